use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::{
    cache::LookupCache,
    fields::{FieldRules, FieldRulesError},
    jobs::JobManager,
    lookup::{LookupClient, LookupError, LookupOptions},
    runner::BatchRunner,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub jobs: Arc<JobManager>,
    /// Delay used when a submission does not ask for one.
    pub default_delay: Duration,
}

impl AppState {
    pub fn new(db: SqlitePool, jobs: Arc<JobManager>, default_delay: Duration) -> Self {
        Self {
            db,
            jobs,
            default_delay,
        }
    }

    /// Wire the cache, lookup client, runner and job manager from configuration.
    pub fn from_config(db: SqlitePool, config: &AppConfig) -> Result<Self, StartupError> {
        let cache = Arc::new(LookupCache::new(db.clone(), config.cache_ttl_seconds));

        let rules = match &config.field_rules_path {
            Some(path) => {
                tracing::info!(path = %path, "Loading response field rules");
                FieldRules::from_file(path)?
            }
            None => FieldRules::default(),
        };

        let client = LookupClient::new(
            config.api_base_url.clone(),
            Some(cache),
            LookupOptions::from_config(config),
        )?
        .with_rules(rules);
        let runner = BatchRunner::new(Arc::new(client), config.min_request_interval());
        let jobs = Arc::new(JobManager::new(Arc::new(runner)));

        Ok(Self::new(db, jobs, config.min_request_interval()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    FieldRules(#[from] FieldRulesError),
}
