//! Shared setup for integration tests: temp SQLite caches, a fast-retrying
//! lookup client pointed at a wiremock server, and request builders.
#![allow(dead_code)]

use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use cnpj_batch::app_state::AppState;
use cnpj_batch::db;
use cnpj_batch::models::job::JobSnapshot;
use cnpj_batch::models::lookup::{CacheEntry, Flag};
use cnpj_batch::services::cache::LookupCache;
use cnpj_batch::services::jobs::JobManager;
use cnpj_batch::services::lookup::{LookupClient, LookupOptions};
use cnpj_batch::services::runner::BatchRunner;

pub const CNPJ_A: &str = "11222333000181";
pub const CNPJ_B: &str = "11444777000161";
pub const CNPJ_C: &str = "04252011000110";

/// A cache database living in its own temp directory.
pub struct TestCache {
    pub cache: Arc<LookupCache>,
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn open_cache(ttl_seconds: i64) -> TestCache {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache").join("cnpja_cache.sqlite3");
    let pool = db::init_pool(path.to_str().expect("utf-8 path"))
        .await
        .expect("open cache db");
    db::run_migrations(&pool).await.expect("migrations");

    TestCache {
        cache: Arc::new(LookupCache::new(pool.clone(), ttl_seconds)),
        pool,
        _dir: dir,
    }
}

/// Seed a fresh cache row.
pub async fn seed(cache: &LookupCache, cnpj: &str, name: &str) {
    cache
        .put(CacheEntry {
            cnpj: cnpj.to_string(),
            razao_social: name.to_string(),
            simples_nacional: Flag::Yes,
            simei: Flag::No,
            data_consulta: "2024-05-01 10:00:00".to_string(),
            fetched_at: chrono::Utc::now().timestamp(),
        })
        .await
        .expect("seed cache");
}

pub fn options(max_retries: u32) -> LookupOptions {
    LookupOptions {
        timeout: Duration::from_secs(5),
        use_cache: true,
        ttl_seconds: 3600,
        max_retries,
    }
}

/// Lookup client whose backoff "seconds" last one millisecond.
pub fn fast_client(base_url: &str, cache: Option<Arc<LookupCache>>, max_retries: u32) -> LookupClient {
    LookupClient::new(base_url, cache, options(max_retries))
        .expect("client")
        .with_backoff_unit(Duration::from_millis(1))
}

pub fn runner(client: LookupClient, floor: Duration) -> BatchRunner {
    BatchRunner::new(Arc::new(client), floor)
}

pub fn manager(runner: BatchRunner) -> Arc<JobManager> {
    Arc::new(
        JobManager::new(Arc::new(runner))
            .with_intervals(Duration::from_millis(10), Duration::from_secs(15)),
    )
}

pub fn app_state(cache: &TestCache, base_url: &str) -> AppState {
    app_state_with_floor(cache, base_url, Duration::ZERO)
}

/// State whose runner never waits less than `floor` between uncached lookups.
pub fn app_state_with_floor(cache: &TestCache, base_url: &str, floor: Duration) -> AppState {
    let client = fast_client(base_url, Some(Arc::clone(&cache.cache)), 2);
    let jobs = manager(runner(client, floor));
    AppState::new(cache.pool.clone(), jobs, floor)
}

/// Typical CNPJá `office` response.
pub fn office_body(name: &str, simples: bool, simei: bool) -> Value {
    json!({
        "taxId": "11222333000181",
        "company": {
            "name": name,
            "simples": { "optant": simples, "since": "2019-01-01" },
            "simei": { "optant": simei, "since": null }
        }
    })
}

pub async fn wait_until_done(jobs: &JobManager, id: Uuid) -> JobSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = jobs.get_status(id).expect("job exists");
        if snapshot.done {
            return snapshot;
        }
        assert!(tokio::time::Instant::now() < deadline, "job did not finish in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_progress(jobs: &JobManager, id: Uuid, at_least: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while jobs.get_status(id).expect("job exists").progress < at_least {
        assert!(tokio::time::Instant::now() < deadline, "job made no progress");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A `multipart/form-data` body with one `file` field. Returns (content type, body).
pub fn multipart_file(file_name: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = "cnpjbatchtestboundary";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}
