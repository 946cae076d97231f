//! Downstream registry records
//!
//! One [`Downstream`] per configured backend: its URL, the groups it
//! claims, its probe status, and the model/capabilities fragments captured
//! at initialization time. Records are created at startup, updated by the
//! initializer and the health monitor, and destroyed only at process exit.

use chrono::{DateTime, Utc};

use crate::config::DownstreamConfig;
use crate::models::{Capabilities, DownstreamHealth, RegistryModel};
use crate::web::extractors::canonical_base;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownstreamStatus {
    /// Not yet probed successfully.
    Pending,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct Downstream {
    pub config: DownstreamConfig,
    /// Sanitized base URL (no trailing slash).
    pub base_url: String,
    pub status: DownstreamStatus,
    pub initialized: bool,
    pub model: Option<RegistryModel>,
    pub capabilities: Option<Capabilities>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Downstream {
    pub fn new(config: DownstreamConfig) -> Self {
        let base_url = canonical_base(&config.url);
        Self {
            config,
            base_url,
            status: DownstreamStatus::Pending,
            initialized: false,
            model: None,
            capabilities: None,
            last_checked: None,
            last_error: None,
        }
    }

    /// Group types this downstream claims, deduplicated, sorted.
    pub fn group_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .config
            .groups
            .iter()
            .map(|claim| claim.group_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    pub fn is_healthy(&self) -> bool {
        self.status == DownstreamStatus::Healthy
    }

    /// Whether the bridge may route requests to this downstream.
    pub fn is_routable(&self) -> bool {
        self.initialized && self.status == DownstreamStatus::Healthy
    }

    pub fn health(&self) -> DownstreamHealth {
        DownstreamHealth {
            url: self.base_url.clone(),
            healthy: self.is_healthy(),
            initialized: self.initialized,
            group_types: self.group_types(),
            last_checked: self.last_checked,
            last_error: self.last_error.clone(),
        }
    }
}
