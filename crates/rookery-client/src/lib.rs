//! Facade client for the rookery coordination recipes.
//!
//! [`RookeryClient`] composes the session state machine with the
//! retry/backoff policies and the lock / one-for-all recipes into the
//! object application code interacts with:
//!
//! ```ignore
//! use rookery_client::{ClientConfig, RookeryClient};
//!
//! let client = RookeryClient::new(
//!     move || connect_store(&endpoint),
//!     ClientConfig::default(),
//! );
//! client.connect().await;
//!
//! let lock = client.observe_lock("/locks/nightly-report", None).await;
//! let mut states = lock.subscribe();
//! while states.changed().await.is_ok() {
//!     if states.borrow().value() == Some(true) {
//!         // critical section
//!     }
//! }
//!
//! client.disconnect().await;
//! ```
//!
//! The whole session signal is itself retried: a fatal session failure
//! reconnects from scratch after backoff, up to the session policy's
//! budget, after which the terminal failure is surfaced to every
//! dependent signal. While the session is anything other than
//! connected, lock and leader observations deterministically read "not
//! holding".

mod client;
mod config;

pub use client::RookeryClient;
pub use config::ClientConfig;
