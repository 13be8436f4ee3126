//! Shared types for the store capability surface.

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::oneshot;

/// How a node should be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Removed by the store when the creating session ends.
    Ephemeral,
    /// Persistent, with a store-assigned monotonic suffix.
    Sequential,
    /// Ephemeral, with a store-assigned monotonic suffix.
    EphemeralSequential,
}

impl CreateMode {
    /// Whether nodes created in this mode vanish with their session.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Whether the store appends a sequence suffix to the node name.
    pub fn is_sequential(&self) -> bool {
        matches!(self, CreateMode::Sequential | CreateMode::EphemeralSequential)
    }
}

/// Raw connection state-change notification from the store.
///
/// The session state machine maps these onto its own state enumeration;
/// events it does not recognize arrive as [`SessionEvent::Other`] and
/// are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The connection is established with full read/write access.
    SyncConnected,
    /// The connection is established against a read-only replica.
    ReadOnlyConnected,
    /// The connection dropped; the session may still be recovered.
    Disconnected,
    /// The session's credentials were rejected. Fatal.
    AuthFailed,
    /// The session expired server-side. Fatal.
    Expired,
    /// Any other notification the client does not act on.
    Other,
}

/// A one-shot subscription to the next change affecting a node.
///
/// The store arms the watch at query time; [`NodeWatch::triggered`]
/// resolves when the watched condition changes. A watch whose trigger
/// side is dropped (connection teardown) also resolves, so waiters
/// always wake up and re-query rather than hanging on a dead session.
#[derive(Debug)]
pub struct NodeWatch {
    rx: oneshot::Receiver<()>,
}

impl NodeWatch {
    /// Create a watch and the trigger its store fires it with.
    pub fn pair() -> (NodeWatchTrigger, NodeWatch) {
        let (tx, rx) = oneshot::channel();
        (NodeWatchTrigger { tx }, NodeWatch { rx })
    }

    /// Wait until the watch fires (or its session is torn down).
    pub async fn triggered(self) {
        let _ = self.rx.await;
    }
}

/// Store-side handle that fires a [`NodeWatch`] exactly once.
#[derive(Debug)]
pub struct NodeWatchTrigger {
    tx: oneshot::Sender<()>,
}

impl NodeWatchTrigger {
    /// Fire the watch. Consumes the trigger; a watch fires at most once.
    pub fn fire(self) {
        let _ = self.tx.send(());
    }
}

/// Result of a children listing, with an optional change watch.
#[derive(Debug)]
pub struct ChildrenReply {
    /// Child node names in creation order, without the parent path.
    pub children: Vec<String>,
    /// Armed when the listing was requested with a watch; fires on the
    /// next change to the child set.
    pub watch: Option<NodeWatch>,
}

/// Result of an existence query, with an optional change watch.
#[derive(Debug)]
pub struct ExistsReply {
    /// Whether the node currently exists.
    pub exists: bool,
    /// Armed when the query was requested with a watch; fires on the
    /// next create/remove of the node.
    pub watch: Option<NodeWatch>,
}
