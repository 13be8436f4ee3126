//! Bounded exponential-backoff retry.
//!
//! A [`RetryPolicy`] describes a finite sequence of delays; element *i*
//! is `min(initial_delay * delay_factor^i, max_delay)` and the sequence
//! has exactly `max_retries` elements. [`with_retry`] composes that
//! sequence with an asynchronous operation and a predicate: recoverable
//! failures wait out the next delay and re-run the operation from
//! scratch, everything else propagates immediately. Exhausting the
//! sequence propagates the last error untouched; the bounded delay
//! budget is the client's only timeout mechanism.

use std::future::Future;
use std::time::Duration;

use rookery_constants::coordination::CLIENT_RETRY_DELAY_FACTOR;
use rookery_constants::coordination::CLIENT_RETRY_INITIAL_DELAY_MS;
use rookery_constants::coordination::CLIENT_RETRY_MAX_DELAY_MS;
use rookery_constants::coordination::CLIENT_RETRY_MAX_RETRIES;
use rookery_constants::coordination::SESSION_RETRY_DELAY_FACTOR;
use rookery_constants::coordination::SESSION_RETRY_INITIAL_DELAY_MS;
use rookery_constants::coordination::SESSION_RETRY_MAX_DELAY_MS;
use rookery_constants::coordination::SESSION_RETRY_MAX_RETRIES;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::CoordinationError;

/// Configuration for bounded exponential backoff.
///
/// Pure configuration, immutable once constructed. The default is the
/// client-facing policy used for store operations inside the recipes;
/// [`RetryPolicy::session`] is the slower policy used for
/// reconnect-from-scratch after a fatal session failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Factor by which each successive delay grows.
    pub delay_factor: f64,
    /// Ceiling on a single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Maximum number of retries before the error propagates.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: CLIENT_RETRY_INITIAL_DELAY_MS,
            delay_factor: CLIENT_RETRY_DELAY_FACTOR,
            max_delay_ms: CLIENT_RETRY_MAX_DELAY_MS,
            max_retries: CLIENT_RETRY_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// The session reconnect policy.
    pub fn session() -> Self {
        Self {
            initial_delay_ms: SESSION_RETRY_INITIAL_DELAY_MS,
            delay_factor: SESSION_RETRY_DELAY_FACTOR,
            max_delay_ms: SESSION_RETRY_MAX_DELAY_MS,
            max_retries: SESSION_RETRY_MAX_RETRIES,
        }
    }
}

/// The finite, lazily generated delay sequence of a policy.
///
/// Each call to [`delays`] yields a fresh, independent sequence; there
/// is no shared state between invocations.
#[derive(Debug, Clone)]
pub struct Delays {
    policy: RetryPolicy,
    index: u32,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.index >= self.policy.max_retries {
            return None;
        }
        let grown = (self.policy.initial_delay_ms as f64) * self.policy.delay_factor.powi(self.index as i32);
        let capped = grown.min(self.policy.max_delay_ms as f64);
        self.index += 1;
        Some(Duration::from_millis(capped as u64))
    }
}

/// The delay sequence for `policy`.
pub fn delays(policy: &RetryPolicy) -> Delays {
    Delays {
        policy: policy.clone(),
        index: 0,
    }
}

/// The canonical retry predicate: retry exactly the recoverable
/// connection-loss code.
pub fn recoverable(error: &CoordinationError) -> bool {
    error.is_recoverable()
}

/// Run `operation`, retrying failures against a fresh delay sequence.
///
/// On success the value passes through unchanged; no delay is consumed
/// when there is no error. On failure, if a delay remains and
/// `should_retry` accepts the error, the combinator sleeps that delay
/// and re-invokes `operation` from scratch — it keeps no memory of a
/// failed attempt, so operations must be idempotent or externally made
/// safe to repeat. Once delays are exhausted, or `should_retry`
/// declines, the original error propagates.
///
/// The sleep suspends cooperatively; dropping the returned future
/// mid-delay cancels the pending attempt.
pub async fn with_retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> Result<T, CoordinationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoordinationError>>,
    P: Fn(&CoordinationError) -> bool,
{
    let mut remaining = delays(policy);
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => match remaining.next() {
                Some(delay) if should_retry(&error) => {
                    debug!(delay_ms = delay.as_millis() as u64, error = %error, "retrying after backoff");
                    tokio::time::sleep(delay).await;
                }
                _ => return Err(error),
            },
        }
    }
}
