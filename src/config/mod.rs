use serde::Deserialize;
use std::time::Duration;

/// Environment variable prefix for every setting (e.g. `CNPJA_CACHE_PATH`).
pub const ENV_PREFIX: &str = "CNPJA_";

/// The public CNPJá API allows 5 lookups per minute per IP.
pub const PUBLIC_API_MIN_DELAY_SECONDS: f64 = 12.5;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite file backing the lookup cache.
    #[serde(default = "default_cache_path")]
    pub cache_path: String,

    /// Cache entries older than this are ignored. Zero or negative never expires.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: i64,

    /// Lookup endpoint; the identifier is appended as the last path segment.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per identifier (at least one is always made).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Floor for the delay between two uncached lookups.
    #[serde(default = "default_min_delay_seconds")]
    pub min_delay_seconds: f64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// JSON file overriding the response field candidates.
    #[serde(default)]
    pub field_rules_path: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cache_path() -> String {
    "data/cnpja_cache.sqlite3".to_string()
}

fn default_cache_ttl_seconds() -> i64 {
    24 * 60 * 60
}

fn default_api_base_url() -> String {
    "https://open.cnpja.com/office".to_string()
}

fn default_request_timeout_secs() -> u64 {
    25
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_delay_seconds() -> f64 {
    PUBLIC_API_MIN_DELAY_SECONDS
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed(ENV_PREFIX).from_env()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Floor applied to every batch's inter-request delay.
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_delay_seconds.max(0.0))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cache_path: default_cache_path(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            min_delay_seconds: default_min_delay_seconds(),
            max_upload_bytes: default_max_upload_bytes(),
            field_rules_path: None,
        }
    }
}
