//! Capability boundary to the coordination store.
//!
//! Rookery builds its recipes on a ZooKeeper-style hierarchical, watch-capable
//! store. This crate defines the small capability surface the rest of the
//! workspace programs against:
//!
//! - [`CoordinationStore`]: connect/close, session events, and the four node
//!   operations (create, list children, exists, remove)
//! - [`StoreError`]: store error codes; exactly one code
//!   ([`StoreError::ConnectionLoss`]) is recoverable-with-retry
//! - [`CreateMode`]: persistent/ephemeral x plain/sequential node semantics
//! - [`SessionEvent`]: raw connection state-change notifications
//! - [`NodeWatch`]: a one-shot subscription to the next change affecting a node
//!
//! The store's wire protocol and server-side consensus are out of scope; any
//! implementation of [`CoordinationStore`] is assumed correct. The
//! `rookery-testing` crate provides a deterministic in-memory implementation.

mod error;
mod traits;
mod types;

pub use error::StoreError;
pub use traits::CoordinationStore;
pub use types::ChildrenReply;
pub use types::CreateMode;
pub use types::ExistsReply;
pub use types::NodeWatch;
pub use types::NodeWatchTrigger;
pub use types::SessionEvent;
