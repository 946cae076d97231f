//! Centralized error handling
//!
//! Every user-visible failure maps onto the RFC 9457 problem taxonomy the
//! registry emits: a stable `type` URI, a short `title`, and an HTTP status.
//! [`RegistryError`] is the single error currency inside the catalog engine
//! and the bridge; [`ConfigError`] covers startup-time configuration
//! failures, which terminate the process with exit code 2 instead of
//! producing an HTTP response.

pub mod types;

pub use types::*;

/// Convenience alias for results carrying a [`RegistryError`].
pub type RegistryResult<T> = Result<T, RegistryError>;
