//! Error types for the coordination recipes.

use rookery_core::StoreError;
use snafu::Snafu;

/// Errors from the coordination client.
///
/// Clonable so a terminal failure can be fanned out to every
/// dependent of a shared signal.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// A client-node identity component contains the reserved separator.
    ///
    /// Raised at identity construction, before anything reaches the
    /// store.
    #[snafu(display("invalid node component: {component}"))]
    InvalidComponent {
        /// The offending component.
        component: String,
    },

    /// A node name could not be parsed into the expected shape.
    ///
    /// Indicates a programming error or foreign data in the namespace;
    /// never retried.
    #[snafu(display("invalid node name: {node}"))]
    InvalidNodeFormat {
        /// The unparseable node name.
        node: String,
    },

    /// The session's credentials were rejected. Terminal for the
    /// session and every signal derived from it.
    #[snafu(display("session authentication failed"))]
    AuthenticationFailed,

    /// The session expired. Terminal for the session and every signal
    /// derived from it.
    #[snafu(display("session expired"))]
    SessionExpired,

    /// An underlying store operation failed.
    #[snafu(display("store error: {source}"))]
    Store {
        /// The store error, untranslated.
        source: StoreError,
    },
}

impl CoordinationError {
    /// Whether the active retry policy may absorb this error.
    ///
    /// True exactly for store errors carrying the connection-loss code;
    /// everything else propagates immediately.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoordinationError::Store { source } => source.is_recoverable(),
            _ => false,
        }
    }
}

impl From<StoreError> for CoordinationError {
    fn from(source: StoreError) -> Self {
        match source {
            StoreError::AuthFailed => CoordinationError::AuthenticationFailed,
            StoreError::SessionExpired => CoordinationError::SessionExpired,
            other => CoordinationError::Store { source: other },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_loss_is_recoverable() {
        let err = CoordinationError::from(StoreError::ConnectionLoss);
        assert!(err.is_recoverable());
    }

    #[test]
    fn terminal_session_codes_map_to_session_errors() {
        assert!(matches!(
            CoordinationError::from(StoreError::AuthFailed),
            CoordinationError::AuthenticationFailed
        ));
        assert!(matches!(
            CoordinationError::from(StoreError::SessionExpired),
            CoordinationError::SessionExpired
        ));
    }

    #[test]
    fn parse_and_component_errors_are_not_recoverable() {
        assert!(!CoordinationError::InvalidComponent { component: "a-b".into() }.is_recoverable());
        assert!(!CoordinationError::InvalidNodeFormat { node: "a-b-c-d-1".into() }.is_recoverable());
    }
}
