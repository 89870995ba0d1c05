//! CNPJá public API client.
//!
//! Endpoint: `GET {base_url}/{cnpj}` (default <https://open.cnpja.com/office>).
//! The public tier allows 5 lookups per minute per IP, so 429 responses are
//! expected and retried after the server-provided `Retry-After`.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::models::cnpj;
use crate::models::lookup::LookupResult;
use crate::services::cache::LookupCache;
use crate::services::fields::FieldRules;

const USER_AGENT: &str = "consulta-optantes/1.0 (+https://cnpja.com/api/open)";

pub const RATE_LIMIT_ERROR: &str = "Rate limit excedido (API pública: 5 consultas/min)";

/// Wait used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: i64 = 60;
const RETRY_AFTER_RANGE: (i64, i64) = (1, 90);
const SERVER_ERROR_BACKOFF_CAP_SECS: u64 = 20;
const NETWORK_ERROR_BACKOFF_CAP_SECS: u64 = 15;

/// Per-lookup knobs.
#[derive(Debug, Clone)]
pub struct LookupOptions {
    pub timeout: Duration,
    pub use_cache: bool,
    /// Cache entries older than this are ignored; `<= 0` never expires.
    pub ttl_seconds: i64,
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_retries: u32,
}

impl LookupOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            use_cache: true,
            ttl_seconds: config.cache_ttl_seconds,
            max_retries: config.max_retries,
        }
    }
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What one HTTP attempt concluded.
enum Attempt {
    Finished(LookupResult),
    Retry { wait_secs: u64, error: String },
}

/// Client for the CNPJ lookup API, backed by the local cache.
pub struct LookupClient {
    http: Client,
    base_url: String,
    cache: Option<Arc<LookupCache>>,
    rules: FieldRules,
    options: LookupOptions,
    /// Length of one "second" of backoff.
    backoff_unit: Duration,
}

impl LookupClient {
    pub fn new(
        base_url: impl Into<String>,
        cache: Option<Arc<LookupCache>>,
        options: LookupOptions,
    ) -> Result<Self, LookupError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache,
            rules: FieldRules::default(),
            options,
            backoff_unit: Duration::from_secs(1),
        })
    }

    pub fn with_rules(mut self, rules: FieldRules) -> Self {
        self.rules = rules;
        self
    }

    /// Scale every backoff and `Retry-After` wait (one second by default).
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Look up one identifier with the client's default options.
    pub async fn lookup(&self, raw: &str) -> LookupResult {
        self.lookup_with(raw, &self.options).await
    }

    /// Look up one identifier. Never fails: problems are reported in `erro`.
    pub async fn lookup_with(&self, raw: &str, opts: &LookupOptions) -> LookupResult {
        let cnpj = cnpj::normalize(raw);

        if !cnpj::is_valid(&cnpj) {
            debug!(input = raw, "Skipping lookup of invalid CNPJ");
            metrics::counter!("cnpj_lookups_total", "outcome" => "invalid").increment(1);
            return LookupResult::failure(cnpj, cnpj::INVALID_CNPJ_ERROR);
        }

        if opts.use_cache {
            if let Some(hit) = self.cached(&cnpj, opts.ttl_seconds).await {
                debug!(cnpj = %cnpj, "Cache hit");
                metrics::counter!("cnpj_cache_hits_total").increment(1);
                metrics::counter!("cnpj_lookups_total", "outcome" => "cache").increment(1);
                return hit;
            }
        }

        let started = Instant::now();
        let result = self.fetch(&cnpj, opts).await;
        metrics::histogram!("cnpj_lookup_seconds").record(started.elapsed().as_secs_f64());

        if result.is_success() {
            metrics::counter!("cnpj_lookups_total", "outcome" => "success").increment(1);
            if opts.use_cache {
                self.store(&result).await;
            }
        } else {
            metrics::counter!("cnpj_lookups_total", "outcome" => "error").increment(1);
        }

        result
    }

    async fn cached(&self, cnpj: &str, ttl_seconds: i64) -> Option<LookupResult> {
        let cache = self.cache.as_ref()?;
        match cache.get_with_ttl(cnpj, ttl_seconds).await {
            Ok(entry) => entry.map(|e| e.into_result()),
            Err(e) => {
                warn!(cnpj = %cnpj, error = %e, "Cache read failed, querying API");
                None
            }
        }
    }

    async fn store(&self, result: &LookupResult) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(result).await {
                warn!(cnpj = %result.cnpj, error = %e, "Cache write failed");
            }
        }
    }

    /// Query the API with bounded retries.
    async fn fetch(&self, cnpj: &str, opts: &LookupOptions) -> LookupResult {
        let url = format!("{}/{}", self.base_url, cnpj);
        let attempts = opts.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.attempt(&url, cnpj, opts.timeout, attempt).await {
                Attempt::Finished(result) => return result,
                Attempt::Retry { wait_secs, error } => {
                    if attempt < attempts {
                        warn!(
                            cnpj = %cnpj,
                            attempt = attempt,
                            wait_secs = wait_secs,
                            error = %error,
                            "Lookup failed, retrying"
                        );
                        tokio::time::sleep(self.backoff_unit * wait_secs as u32).await;
                    }
                    last_error = error;
                }
            }
        }

        LookupResult::failure(cnpj, last_error)
    }

    async fn attempt(&self, url: &str, cnpj: &str, timeout: Duration, attempt: u32) -> Attempt {
        let response = match self.http.get(url).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                return Attempt::Retry {
                    wait_secs: exp_backoff(attempt, NETWORK_ERROR_BACKOFF_CAP_SECS),
                    error: format!("Erro de rede: {}", e),
                }
            }
        };

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let (min, max) = RETRY_AFTER_RANGE;
            let wait = retry_after_secs(response.headers()).clamp(min, max);
            return Attempt::Retry {
                wait_secs: wait as u64,
                error: RATE_LIMIT_ERROR.to_string(),
            };
        }

        if status.is_server_error() {
            return Attempt::Retry {
                wait_secs: exp_backoff(attempt, SERVER_ERROR_BACKOFF_CAP_SECS),
                error: format!("Erro HTTP {} (servidor) ao consultar CNPJá", status.as_u16()),
            };
        }

        // Other 4xx responses will not change on retry.
        if status.is_client_error() {
            return Attempt::Finished(LookupResult::failure(
                cnpj,
                format!("Erro HTTP {} ao consultar CNPJá", status.as_u16()),
            ));
        }

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return Attempt::Retry {
                    wait_secs: exp_backoff(attempt, NETWORK_ERROR_BACKOFF_CAP_SECS),
                    error: format!("Erro de rede: {}", e),
                }
            }
        };

        let body = match parse_body(&bytes) {
            Ok(v) => v,
            Err(e) => {
                return Attempt::Finished(LookupResult::failure(
                    cnpj,
                    format!("Resposta inválida da API: {}", e),
                ))
            }
        };

        Attempt::Finished(LookupResult::success(
            cnpj,
            self.rules.display_name(&body),
            self.rules.simples_nacional(&body),
            self.rules.simei(&body),
        ))
    }
}

/// `Retry-After` in whole seconds, or the default when absent or unparseable.
fn retry_after_secs(headers: &HeaderMap) -> i64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite())
        .map(|secs| secs as i64)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// `min(cap, 2^attempt)` seconds.
fn exp_backoff(attempt: u32, cap: u64) -> u64 {
    2u64.saturating_pow(attempt).min(cap)
}

/// An empty or `null` body is treated as an empty object.
fn parse_body(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_slice(bytes)? {
        Value::Null => Ok(Value::Object(Default::default())),
        v => Ok(v),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
