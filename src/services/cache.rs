use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::db::queries;
use crate::models::cnpj;
use crate::models::lookup::{CacheEntry, LookupResult};

/// Persistent lookup cache with a time-to-live.
///
/// Every read and write runs under one async mutex, so concurrent batch jobs
/// see each transaction as atomic.
pub struct LookupCache {
    pool: SqlitePool,
    ttl_seconds: i64,
    guard: Mutex<()>,
}

impl LookupCache {
    pub fn new(pool: SqlitePool, ttl_seconds: i64) -> Self {
        Self {
            pool,
            ttl_seconds,
            guard: Mutex::new(()),
        }
    }

    /// Fresh entry for `cnpj` under the configured ttl.
    pub async fn get(&self, cnpj: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.get_with_ttl(cnpj, self.ttl_seconds).await
    }

    /// Fresh entry for `cnpj`, treating rows older than `ttl_seconds` as absent.
    pub async fn get_with_ttl(
        &self,
        cnpj: &str,
        ttl_seconds: i64,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let entry = {
            let _lock = self.guard.lock().await;
            queries::get_cache_entry(&self.pool, cnpj).await?
        };

        Ok(entry.filter(|e| !is_expired(e.fetched_at, now_epoch(), ttl_seconds)))
    }

    /// Store a successful lookup, stamping `fetched_at` with the current time.
    ///
    /// Returns `false` without writing when the identifier is not 14 digits.
    pub async fn set(&self, result: &LookupResult) -> Result<bool, CacheError> {
        self.put(CacheEntry::from_result(result, now_epoch())).await
    }

    /// Upsert an entry as given.
    pub async fn put(&self, entry: CacheEntry) -> Result<bool, CacheError> {
        if !cnpj::is_valid(&entry.cnpj) {
            return Ok(false);
        }

        let _lock = self.guard.lock().await;
        queries::upsert_cache_entry(&self.pool, &entry).await?;
        Ok(true)
    }
}

/// `fetched_at == 0` marks a row with unknown age, which never expires.
pub fn is_expired(fetched_at: i64, now: i64, ttl_seconds: i64) -> bool {
    ttl_seconds > 0 && fetched_at > 0 && now - fetched_at > ttl_seconds
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] sqlx::Error),
}
