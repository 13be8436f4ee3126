//! Constants for node naming and retry/backoff behavior.
//!
//! Two retry policies exist with independent defaults: the session
//! policy governs reconnect-from-scratch after a fatal session failure,
//! the client policy governs individual store operations inside the
//! recipes. Both are bounded; exhausting a policy's budget is the sole
//! timeout mechanism in the client.

// ============================================================================
// Node Naming
// ============================================================================

/// Separator between the components of a client node name.
///
/// Identity components are validated against this character before they
/// are percent-encoded, so a node name always splits unambiguously.
pub const NODE_COMPONENT_SEPARATOR: char = '-';

/// Sentinel used for an identity component that was not supplied.
pub const DEFAULT_NODE_COMPONENT: &str = "none";

/// Width of the zero-padded sequence suffix assigned by the store.
pub const SEQUENCE_SUFFIX_WIDTH: usize = 10;

// ============================================================================
// Session Retry Policy Defaults
// ============================================================================

/// Initial delay before the first session reconnect attempt (1 second).
pub const SESSION_RETRY_INITIAL_DELAY_MS: u64 = 1_000;

/// Growth factor applied to successive session reconnect delays.
pub const SESSION_RETRY_DELAY_FACTOR: f64 = 2.0;

/// Ceiling on a single session reconnect delay (8 seconds).
pub const SESSION_RETRY_MAX_DELAY_MS: u64 = 8_000;

/// Maximum number of session reconnect attempts before the failure is
/// surfaced to every dependent signal.
pub const SESSION_RETRY_MAX_RETRIES: u32 = 6;

// ============================================================================
// Client-Facing Retry Policy Defaults
// ============================================================================

/// Initial delay before the first retry of a store operation (500ms).
pub const CLIENT_RETRY_INITIAL_DELAY_MS: u64 = 500;

/// Growth factor applied to successive store-operation retry delays.
pub const CLIENT_RETRY_DELAY_FACTOR: f64 = 2.0;

/// Ceiling on a single store-operation retry delay (8 seconds).
pub const CLIENT_RETRY_MAX_DELAY_MS: u64 = 8_000;

/// Maximum number of retries for a single store operation.
pub const CLIENT_RETRY_MAX_RETRIES: u32 = 7;
