//! Error codes surfaced by coordination store implementations.

use snafu::Snafu;

/// Errors from coordination store operations.
///
/// These mirror the error codes of the underlying store protocol. The
/// client treats exactly one code as recoverable-with-retry
/// ([`StoreError::ConnectionLoss`]); every other code is terminal for
/// the operation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The connection to the store was lost mid-operation.
    ///
    /// The operation's outcome is unknown: it may or may not have been
    /// applied server-side before the acknowledgement was lost. Callers
    /// must re-derive state rather than assume either outcome.
    #[snafu(display("connection to the store was lost"))]
    ConnectionLoss,

    /// The addressed node does not exist.
    #[snafu(display("node does not exist: {path}"))]
    NoNode {
        /// Path of the missing node.
        path: String,
    },

    /// A node already exists at the addressed path.
    #[snafu(display("node already exists: {path}"))]
    NodeExists {
        /// Path of the existing node.
        path: String,
    },

    /// The node cannot be removed because it has children.
    #[snafu(display("node has children: {path}"))]
    NotEmpty {
        /// Path of the non-empty node.
        path: String,
    },

    /// The session's credentials were rejected.
    #[snafu(display("authentication failed"))]
    AuthFailed,

    /// The session has expired; its ephemeral nodes are gone.
    #[snafu(display("session expired"))]
    SessionExpired,

    /// A store-specific failure with no dedicated code.
    #[snafu(display("store failure: {reason}"))]
    Internal {
        /// Description of the failure.
        reason: String,
    },
}

impl StoreError {
    /// Whether this error may be retried with backoff.
    ///
    /// Only [`StoreError::ConnectionLoss`] qualifies; every other code
    /// indicates a condition a retry cannot fix.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::ConnectionLoss)
    }
}
