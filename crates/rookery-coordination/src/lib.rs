//! Coordination recipes over a watch-capable hierarchical store.
//!
//! This crate implements exclusive locks and one-for-all leader
//! election from a store's low-level primitives (create, list children,
//! existence watch, remove) rather than anything the store provides
//! natively:
//!
//! - `identity` - client node naming, parsing, and ordering
//! - `retry` - bounded exponential backoff and the retry combinator
//! - `session` - one connection, mapped onto an observable session state
//! - `watch` - push-based node primitives (children, vanish, create, remove)
//! - `seek` - the shared engine that drives a client node toward a goal
//! - `lock` - exclusive mutual exclusion (watch the predecessor)
//! - `one_for_all` - leader election around a once-per-group action
//!
//! ## Lock Example
//!
//! ```ignore
//! use rookery_coordination::{ClientNodeIdentity, ExclusiveLock, RetryPolicy};
//!
//! let lock = ExclusiveLock::new(
//!     session.store(),
//!     "/locks/nightly-report",
//!     ClientNodeIdentity::generated(),
//!     RetryPolicy::default(),
//! );
//! let handle = lock.start();
//!
//! let mut states = handle.subscribe();
//! while states.changed().await.is_ok() {
//!     if states.borrow().value() == Some(true) {
//!         // critical section
//!     }
//! }
//! ```

mod error;
pub mod identity;
mod lock;
mod one_for_all;
mod retry;
mod seek;
mod session;
pub mod watch;

pub use error::CoordinationError;
pub use identity::ClientNodeIdentity;
pub use identity::ParsedNode;
pub use identity::compare_by_sequence;
pub use identity::generate_client_id;
pub use identity::parse_client_node;
pub use identity::sorted_by_sequence;
pub use lock::ExclusiveLock;
pub use lock::run_when_held;
pub use one_for_all::OneForAll;
pub use retry::Delays;
pub use retry::RetryPolicy;
pub use retry::delays;
pub use retry::recoverable;
pub use retry::with_retry;
pub use seek::NodeSeeker;
pub use seek::RecipeHandle;
pub use seek::RecipeState;
pub use seek::SeekDecision;
pub use seek::SeekPolicy;
pub use session::ConnectionFactory;
pub use session::Session;
pub use session::SessionHandle;
pub use session::SessionState;
pub use watch::ChildFilter;
pub use watch::ChildrenOptions;
