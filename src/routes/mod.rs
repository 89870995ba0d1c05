use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;

/// Application routes (everything except `/metrics`, which needs its own state).
pub fn router(state: AppState) -> Router {
    Router::new()
        // Static UI (embedded at compile time)
        .route("/", get(|| async { Html(include_str!("../../static/index.html")) }))
        .route("/health", get(health::health_check))
        .route("/jobs", post(jobs::submit_job))
        .route("/jobs/{id}/status", get(jobs::get_job_status))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/jobs/{id}/events", get(jobs::job_events))
        .route("/jobs/{id}/download", get(jobs::download_output))
        .with_state(state)
}
