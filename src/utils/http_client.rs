//! HTTP client construction
//!
//! All outbound HTTP (startup probes, health probes, proxying, upstream
//! metadata fetches) flows through clients built here so timeouts and the
//! user agent are configured in one place.

use std::time::Duration;

use crate::errors::{RegistryError, RegistryResult};

/// Factory for the reqwest clients used by the bridge and catalog engine.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    user_agent: String,
}

impl HttpClientFactory {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    /// Client for lightweight probes; the per-attempt timeout is enforced on
    /// the whole request, not only the connect phase.
    pub fn probe_client(&self, timeout: Duration) -> RegistryResult<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::internal(format!("failed to build probe client: {e}")))
    }

    /// Client for proxied requests. No overall timeout here: proxy deadlines
    /// wrap the whole forward call so streaming bodies are not cut short by
    /// a per-request cap that starts before the first byte.
    pub fn proxy_client(&self, connect_timeout: Duration) -> RegistryResult<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RegistryError::internal(format!("failed to build proxy client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_clients() {
        let factory = HttpClientFactory::new("xregistry-bridge/test");
        assert!(factory.probe_client(Duration::from_secs(5)).is_ok());
        assert!(factory.proxy_client(Duration::from_secs(5)).is_ok());
    }
}
