//! Shared utilities
//!
//! Timestamp formatting and HTTP client construction. URL canonicalization
//! lives with the base-URL resolution flow in `web::extractors`; retry and
//! refresh jitter live at their call sites.

pub mod datetime;
pub mod http_client;

pub use http_client::HttpClientFactory;
