//! Testing infrastructure for rookery coordination tests.
//!
//! Provides [`DeterministicCoordinationStore`], an in-memory
//! implementation of the store capability surface with predictable
//! behavior for tests:
//!
//! - Hierarchical namespace with ephemeral and sequential node semantics
//! - One-shot children/exists watches fired on create and remove
//! - Session events over a broadcast channel, with an automatic
//!   sync-connected on `connect()` (suppressible for scripted tests)
//! - Fault injection: connection-loss failures and lost create
//!   acknowledgements
//! - Connect/close counting for exactly-once assertions

mod store;

pub use store::{DeterministicCoordinationStore, SharedNamespace};
