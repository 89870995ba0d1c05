use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle of a batch lookup job.
///
/// `Queued -> Running -> {Done | Error | Canceling -> Canceled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Canceling,
    Canceled,
    Done,
    Error,
}

/// Result file format requested at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    Csv,
    #[default]
    Xlsx,
}

impl OutputFormat {
    pub fn file_name(self) -> String {
        format!("resultado.{}", self)
    }

    pub fn media_type(self) -> &'static str {
        match self {
            OutputFormat::Csv => "text/csv",
            OutputFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

/// A job held in the in-memory registry.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: usize,
    pub total: usize,
    pub done: bool,
    pub output: Option<Vec<u8>>,
    pub output_format: OutputFormat,
    pub error: Option<String>,
    pub cancel: CancellationToken,
}

impl Job {
    pub fn new(total: usize, output_format: OutputFormat) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            progress: 0,
            total,
            done: false,
            output: None,
            output_format,
            error: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            status: self.status,
            progress: self.progress,
            total: self.total,
            done: self.done,
            error: self.error.clone(),
            has_output: self.output.is_some(),
            canceled: self.cancel.is_cancelled(),
        }
    }
}

/// Point-in-time view of a job, as returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: usize,
    pub total: usize,
    pub done: bool,
    pub error: Option<String>,
    pub has_output: bool,
    pub canceled: bool,
}
