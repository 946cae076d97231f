//! Configuration
//!
//! Layered with figment: a TOML file (`--config` or `BRIDGE_CONFIG_FILE`),
//! then `XREGISTRY_`-prefixed environment variables (`__` separates nesting
//! levels). A handful of flat environment variables from the deployment
//! contract (`PORT`, `BASE_URL`, `BRIDGE_API_KEY`, `REQUIRED_GROUPS`,
//! `DOWNSTREAMS_JSON`) are applied on top. Durations are humantime strings
//! (`30s`, `12h`).

use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::models::GroupClaim;

pub mod defaults;

use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub init: InitConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub downstreams: Vec<DownstreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Configured base URL; consulted after the forwarding headers.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_base_url_header")]
    pub base_url_header: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            base_url_header: default_base_url_header(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl WebConfig {
    pub fn request_timeout(&self) -> Duration {
        parse_duration_or(&self.request_timeout, Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub required_groups: Vec<String>,
    /// Request-property localhost bypass; off unless explicitly requested,
    /// since `Host:` can be spoofed.
    #[serde(default)]
    pub allow_localhost_bypass: bool,
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        self.api_key.is_some() || !self.required_groups.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    #[serde(default = "default_init_timeout")]
    pub timeout: String,
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay: String,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: String,
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            timeout: default_init_timeout(),
            retry_initial_delay: default_retry_initial_delay(),
            retry_max_delay: default_retry_max_delay(),
            retry_backoff_factor: default_retry_backoff_factor(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

impl InitConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration_or(&self.timeout, Duration::from_secs(120))
    }

    pub fn retry_initial_delay(&self) -> Duration {
        parse_duration_or(&self.retry_initial_delay, Duration::from_secs(1))
    }

    pub fn retry_max_delay(&self) -> Duration {
        parse_duration_or(&self.retry_max_delay, Duration::from_secs(10))
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration_or(&self.probe_timeout, Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval")]
    pub interval: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        parse_duration_or(&self.interval, Duration::from_secs(60))
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration_or(&self.probe_timeout, Duration::from_secs(10))
    }
}

/// Catalog-engine tuning, consumed by embedders and the integration tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_max_metadata_fetches")]
    pub max_metadata_fetches: usize,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_global_fetch_concurrency")]
    pub global_fetch_concurrency: usize,
    #[serde(default = "default_filter_cache_size")]
    pub filter_cache_size: usize,
    #[serde(default = "default_filter_cache_ttl")]
    pub filter_cache_ttl: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_page_limit")]
    pub default_page_limit: usize,
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_metadata_fetches: default_max_metadata_fetches(),
            fetch_concurrency: default_fetch_concurrency(),
            global_fetch_concurrency: default_global_fetch_concurrency(),
            filter_cache_size: default_filter_cache_size(),
            filter_cache_ttl: default_filter_cache_ttl(),
            refresh_interval: default_refresh_interval(),
            cache_dir: default_cache_dir(),
            default_page_limit: default_page_limit(),
            max_page_limit: default_max_page_limit(),
        }
    }
}

impl EngineSettings {
    pub fn filter_cache_ttl(&self) -> Duration {
        parse_duration_or(&self.filter_cache_ttl, Duration::from_secs(600))
    }

    pub fn refresh_interval(&self) -> Duration {
        parse_duration_or(&self.refresh_interval, Duration::from_secs(12 * 3600))
    }
}

/// One downstream declaration: its URL and the groups it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamConfig {
    pub url: String,
    pub groups: Vec<GroupClaim>,
}

fn parse_duration_or(raw: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(raw).unwrap_or(fallback)
}

impl Config {
    /// Load configuration: TOML file, `XREGISTRY_` env tree, then the flat
    /// deployment variables.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();

        let file = config_file
            .map(String::from)
            .or_else(|| std::env::var("BRIDGE_CONFIG_FILE").ok());
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("XREGISTRY_").split("__"));

        let mut config: Config = figment.extract()?;
        config.apply_flat_env()?;
        Ok(config)
    }

    /// The flat variables the deployment contract enumerates.
    fn apply_flat_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = std::env::var("PORT") {
            self.web.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: "PORT".to_string(),
                reason: format!("'{port}' is not a port number"),
            })?;
        }
        if let Ok(base_url) = std::env::var("BASE_URL") {
            self.web.base_url = Some(base_url);
        }
        if let Ok(header) = std::env::var("BASE_URL_HEADER") {
            self.web.base_url_header = header;
        }
        if let Ok(api_key) = std::env::var("BRIDGE_API_KEY") {
            self.auth.api_key = Some(api_key);
        }
        if let Ok(groups) = std::env::var("REQUIRED_GROUPS") {
            self.auth.required_groups = groups
                .split(',')
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect();
        }
        if let Ok(ms) = std::env::var("INITIALIZATION_TIMEOUT") {
            self.init.timeout = millis_to_duration_string("INITIALIZATION_TIMEOUT", &ms)?;
        }
        if let Ok(ms) = std::env::var("RETRY_INITIAL_DELAY") {
            self.init.retry_initial_delay = millis_to_duration_string("RETRY_INITIAL_DELAY", &ms)?;
        }
        if let Ok(ms) = std::env::var("RETRY_MAX_DELAY") {
            self.init.retry_max_delay = millis_to_duration_string("RETRY_MAX_DELAY", &ms)?;
        }
        if let Ok(factor) = std::env::var("RETRY_BACKOFF_FACTOR") {
            self.init.retry_backoff_factor =
                factor.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "RETRY_BACKOFF_FACTOR".to_string(),
                    reason: format!("'{factor}' is not a number"),
                })?;
        }
        if let Ok(ms) = std::env::var("SERVER_HEALTH_TIMEOUT") {
            let value = millis_to_duration_string("SERVER_HEALTH_TIMEOUT", &ms)?;
            self.init.probe_timeout = value.clone();
            self.health.probe_timeout = value;
        }
        if let Ok(raw) = std::env::var("DOWNSTREAMS_JSON") {
            self.downstreams =
                serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                    field: "DOWNSTREAMS_JSON".to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Reject configurations the bridge cannot start with: malformed URLs,
    /// empty group lists, duplicate `(groupType, groupId)` pairs across
    /// downstreams, nonsensical retry parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.init.retry_backoff_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "init.retry_backoff_factor".to_string(),
                reason: "must be >= 1.0".to_string(),
            });
        }

        let mut seen: std::collections::HashMap<(String, String), String> =
            std::collections::HashMap::new();
        for downstream in &self.downstreams {
            if url::Url::parse(&downstream.url).is_err() {
                return Err(ConfigError::InvalidDownstreamUrl {
                    url: downstream.url.clone(),
                    reason: "not an absolute URL".to_string(),
                });
            }
            if downstream.groups.is_empty() {
                return Err(ConfigError::EmptyGroups {
                    url: downstream.url.clone(),
                });
            }
            for claim in &downstream.groups {
                let key = (claim.group_type.clone(), claim.group_id.clone());
                if let Some(first) = seen.get(&key) {
                    return Err(ConfigError::DuplicateGroup {
                        group_type: claim.group_type.clone(),
                        group_id: claim.group_id.clone(),
                        first: first.clone(),
                        second: downstream.url.clone(),
                    });
                }
                seen.insert(key, downstream.url.clone());
            }
        }
        Ok(())
    }
}


fn millis_to_duration_string(field: &str, raw: &str) -> Result<String, ConfigError> {
    let ms: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{raw}' is not a millisecond count"),
    })?;
    Ok(format!("{ms}ms"))
}
