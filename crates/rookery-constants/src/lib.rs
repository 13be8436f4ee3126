//! Centralized constants for the rookery coordination client.
//!
//! This crate contains the tunables shared across the rookery crates,
//! organized by category for easy discovery and maintenance.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//!
//! # Modules
//!
//! - [`coordination`]: Node naming and retry/backoff defaults
//!
//! # Usage
//!
//! Access constants via their submodule:
//! ```
//! use rookery_constants::coordination::SESSION_RETRY_MAX_RETRIES;
//! ```

pub mod coordination;
