use garde::Validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{JobSnapshot, JobStatus};

/// A source row whose identifier does not normalise to 14 digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidRow {
    /// Raw cell text as read from the upload.
    pub raw: String,
}

/// Query parameters of `POST /jobs`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SubmitQuery {
    /// `csv` or `xlsx`; defaults to `xlsx`.
    #[garde(skip)]
    pub output: Option<String>,

    /// Delay between uncached lookups. Values below the configured floor are raised to it.
    #[serde(alias = "sleep_seconds")]
    #[garde(custom(finite_delay))]
    pub delay_seconds: Option<f64>,
}

/// Longest delay a submission may ask for; larger values are clamped.
pub const MAX_DELAY_SECONDS: f64 = 3600.0;

impl SubmitQuery {
    /// Requested delay clamped to `0..=MAX_DELAY_SECONDS`.
    pub fn min_delay(&self) -> Option<Duration> {
        self.delay_seconds
            .filter(|secs| secs.is_finite())
            .map(|secs| Duration::from_secs_f64(secs.clamp(0.0, MAX_DELAY_SECONDS)))
    }
}

fn finite_delay(value: &Option<f64>, _ctx: &()) -> garde::Result {
    match value {
        Some(secs) if !secs.is_finite() => Err(garde::Error::new("must be a finite number")),
        _ => Ok(()),
    }
}

/// Response after submitting a batch.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

/// Response of `POST /jobs/{id}/cancel`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub ok: bool,
    pub status: JobStatus,
}

/// Payload of a `progress` server-sent event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub status: JobStatus,
    pub progress: usize,
    pub total: usize,
    pub done: bool,
}

impl From<&JobSnapshot> for ProgressPayload {
    fn from(snapshot: &JobSnapshot) -> Self {
        Self {
            status: snapshot.status,
            progress: snapshot.progress,
            total: snapshot.total,
            done: snapshot.done,
        }
    }
}
