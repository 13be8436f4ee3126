//! Client configuration.

use rookery_coordination::RetryPolicy;
use serde::Deserialize;
use serde::Serialize;

/// Configuration for [`RookeryClient`](crate::RookeryClient).
///
/// Both policies are independently configurable option bags; missing
/// fields fall back to the stated defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Policy for reconnecting the session after a fatal failure.
    pub session_retry: RetryPolicy,
    /// Policy for store operations inside the recipes.
    pub recipe_retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_retry: RetryPolicy::session(),
            recipe_retry: RetryPolicy::default(),
        }
    }
}
