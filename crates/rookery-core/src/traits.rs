//! The coordination store capability trait.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::types::ChildrenReply;
use crate::types::CreateMode;
use crate::types::ExistsReply;
use crate::types::SessionEvent;

/// One logical connection to a hierarchical, watch-capable store.
///
/// An implementation owns a single session. The session component of
/// the coordination client is the sole caller of [`connect`] and
/// [`close`]; recipes only issue node operations. Node operations are
/// asynchronous and may fail with any [`StoreError`] code — callers
/// decide per-code whether to retry.
///
/// [`connect`]: CoordinationStore::connect
/// [`close`]: CoordinationStore::close
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Initiate the session handshake.
    ///
    /// Completion of the handshake is reported through the event
    /// stream, not by this call returning.
    async fn connect(&self) -> Result<(), StoreError>;

    /// Close the connection and end the session.
    ///
    /// The store removes the session's ephemeral nodes. Closing an
    /// already-closed connection is an error a correct session
    /// component never makes.
    async fn close(&self) -> Result<(), StoreError>;

    /// Subscribe to session state-change events.
    ///
    /// Subscribers registered before [`connect`] observe the initial
    /// handshake events.
    ///
    /// [`connect`]: CoordinationStore::connect
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;

    /// Create a node, returning the actual created path.
    ///
    /// For sequential modes the returned path carries the
    /// store-assigned suffix.
    async fn create(&self, path: &str, data: Option<Vec<u8>>, mode: CreateMode) -> Result<String, StoreError>;

    /// List the children of a node, optionally arming a one-shot watch
    /// on the child set.
    async fn get_children(&self, path: &str, watch: bool) -> Result<ChildrenReply, StoreError>;

    /// Query a node's existence, optionally arming a one-shot watch on
    /// its create/remove.
    async fn exists(&self, path: &str, watch: bool) -> Result<ExistsReply, StoreError>;

    /// Remove a node.
    async fn remove(&self, path: &str) -> Result<(), StoreError>;
}
