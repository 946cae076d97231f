//! Default values for configuration fields

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

pub fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

pub fn default_port() -> u16 {
    DEFAULT_PORT
}

pub fn default_base_url_header() -> String {
    "x-base-url".to_string()
}

pub fn default_request_timeout() -> String {
    "30s".to_string()
}

pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

pub fn default_init_timeout() -> String {
    "120s".to_string()
}

pub fn default_retry_initial_delay() -> String {
    "1s".to_string()
}

pub fn default_retry_max_delay() -> String {
    "10s".to_string()
}

pub fn default_retry_backoff_factor() -> f64 {
    2.0
}

pub fn default_probe_timeout() -> String {
    "10s".to_string()
}

pub fn default_health_interval() -> String {
    "60s".to_string()
}

pub fn default_max_metadata_fetches() -> usize {
    30
}

pub fn default_fetch_concurrency() -> usize {
    8
}

pub fn default_global_fetch_concurrency() -> usize {
    64
}

pub fn default_filter_cache_size() -> usize {
    2000
}

pub fn default_filter_cache_ttl() -> String {
    "10m".to_string()
}

pub fn default_refresh_interval() -> String {
    "12h".to_string()
}

pub fn default_cache_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("./data/catalog")
}

pub fn default_page_limit() -> usize {
    50
}

pub fn default_max_page_limit() -> usize {
    200
}
