//! In-memory registry of batch jobs and their lifecycle.
//!
//! Jobs are never evicted; a long-running process grows the table without
//! bound. Add TTL-based eviction before relying on this for months of uptime.

use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::models::batch::InvalidRow;
use crate::models::job::{Job, JobSnapshot, JobStatus, OutputFormat};
use crate::services::export::{self, ExportError};
use crate::services::runner::BatchRunner;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Everything needed to start a batch.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub cnpjs: Vec<String>,
    pub invalid_rows: Vec<InvalidRow>,
    pub output_format: OutputFormat,
    pub min_delay: Duration,
}

/// Events emitted by [`JobManager::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// First event of every subscription.
    Open,
    Progress(JobSnapshot),
    /// Idle keep-alive.
    Ping,
    /// Terminal: the job failed.
    Error(String),
    /// Terminal: the job finished (done or canceled).
    Done,
}

/// A finished job's result file.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub media_type: &'static str,
}

/// Owns every job and the runner that executes them.
pub struct JobManager {
    jobs: Mutex<HashMap<Uuid, Job>>,
    runner: Arc<BatchRunner>,
    poll_interval: Duration,
    keepalive_interval: Duration,
}

impl JobManager {
    pub fn new(runner: Arc<BatchRunner>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            runner,
            poll_interval: DEFAULT_POLL_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }

    /// Override how often subscribers re-read job state and how long they
    /// stay silent before a keep-alive.
    pub fn with_intervals(mut self, poll: Duration, keepalive: Duration) -> Self {
        self.poll_interval = poll;
        self.keepalive_interval = keepalive;
        self
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Register a job and start it in the background. Returns immediately.
    pub fn submit(self: &Arc<Self>, request: JobRequest) -> Result<Uuid, JobError> {
        if request.cnpjs.is_empty() && request.invalid_rows.is_empty() {
            return Err(JobError::EmptySubmission);
        }

        let total = request.cnpjs.len() + request.invalid_rows.len();
        let job = Job::new(total, request.output_format);
        let id = job.id;
        self.jobs.lock().insert(id, job);

        metrics::counter!("batch_jobs_submitted_total").increment(1);
        info!(
            job_id = %id,
            valid = request.cnpjs.len(),
            invalid = request.invalid_rows.len(),
            output = %request.output_format,
            "Batch job queued"
        );

        let manager = Arc::clone(self);
        let span = tracing::info_span!("batch_job", job_id = %id);
        tokio::spawn(async move { manager.supervise(id, request).await }.instrument(span));

        Ok(id)
    }

    /// Run the job on its own task and record the outcome exactly once,
    /// including when the task panics.
    async fn supervise(self: Arc<Self>, id: Uuid, request: JobRequest) {
        let cancel = match self.with_job(id, |job| {
            // A cancel may already have moved the job to `Canceling`.
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Running;
            }
            job.cancel.clone()
        }) {
            Some(token) => token,
            None => return,
        };
        info!("Batch job running");

        let manager = Arc::clone(&self);
        let worker = tokio::spawn(
            async move {
                let on_progress = |done: usize, total: usize| {
                    manager.with_job(id, |job| {
                        job.total = total;
                        job.progress = done.min(total);
                    });
                };
                let results = manager
                    .runner
                    .run(
                        &request.cnpjs,
                        &request.invalid_rows,
                        request.min_delay,
                        on_progress,
                        &cancel,
                    )
                    .await;
                export::build_output(&results, request.output_format).map_err(JobError::from)
            }
            .in_current_span(),
        );

        match worker.await {
            Ok(Ok(bytes)) => self.finish(id, bytes),
            Ok(Err(e)) => self.fail(id, e.to_string()),
            Err(join_error) => self.fail(id, format!("Batch task aborted: {}", join_error)),
        }
    }

    fn finish(&self, id: Uuid, bytes: Vec<u8>) {
        let status = self.with_job(id, |job| {
            if job.done {
                return None;
            }
            job.output = Some(bytes);
            job.done = true;
            if job.cancel.is_cancelled() {
                job.status = JobStatus::Canceled;
            } else {
                job.status = JobStatus::Done;
                job.progress = job.total;
            }
            Some(job.status)
        });

        if let Some(Some(status)) = status {
            metrics::counter!("batch_jobs_finished_total", "status" => status.to_string())
                .increment(1);
            info!(status = %status, "Batch job finished");
        }
    }

    fn fail(&self, id: Uuid, message: String) {
        error!(error = %message, "Batch job failed");
        let recorded = self.with_job(id, |job| {
            if job.done {
                return false;
            }
            job.status = JobStatus::Error;
            job.error = Some(message);
            job.done = true;
            true
        });

        if recorded == Some(true) {
            metrics::counter!("batch_jobs_finished_total", "status" => "error").increment(1);
        }
    }

    /// Apply `f` to the job under the registry lock.
    fn with_job<T>(&self, id: Uuid, f: impl FnOnce(&mut Job) -> T) -> Option<T> {
        self.jobs.lock().get_mut(&id).map(f)
    }

    pub fn get_status(&self, id: Uuid) -> Result<JobSnapshot, JobError> {
        self.jobs
            .lock()
            .get(&id)
            .map(Job::snapshot)
            .ok_or(JobError::NotFound(id))
    }

    /// Ask a running job to stop. A finished job is left untouched and its
    /// status returned as-is.
    pub fn cancel(&self, id: Uuid) -> Result<JobStatus, JobError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;

        if job.done {
            return Ok(job.status);
        }

        job.cancel.cancel();
        if matches!(job.status, JobStatus::Queued | JobStatus::Running) {
            job.status = JobStatus::Canceling;
        }
        info!(job_id = %id, "Batch job cancel requested");
        Ok(job.status)
    }

    /// Result file of a finished job.
    pub fn get_output(&self, id: Uuid) -> Result<JobOutput, JobError> {
        let jobs = self.jobs.lock();
        let job = jobs.get(&id).ok_or(JobError::NotFound(id))?;

        match (&job.output, job.done) {
            (Some(bytes), true) if !bytes.is_empty() => Ok(JobOutput {
                bytes: bytes.clone(),
                file_name: job.output_format.file_name(),
                media_type: job.output_format.media_type(),
            }),
            _ => Err(JobError::NotReady(id)),
        }
    }

    /// Live progress feed for a job, ending after `Error` or `Done`.
    ///
    /// Re-reads the job every poll interval and emits `Progress` whenever the
    /// snapshot changes, plus `Ping` when nothing was sent for a while.
    pub fn subscribe(
        self: &Arc<Self>,
        id: Uuid,
    ) -> Result<impl Stream<Item = JobEvent> + Send + 'static, JobError> {
        self.get_status(id)?;
        let manager = Arc::clone(self);

        Ok(async_stream::stream! {
            yield JobEvent::Open;

            let mut last: Option<(JobStatus, usize, usize, bool)> = None;
            let mut last_ping = Instant::now();

            loop {
                let Ok(snapshot) = manager.get_status(id) else { break };

                if snapshot.status == JobStatus::Error {
                    yield JobEvent::Error(
                        snapshot.error.clone().unwrap_or_else(|| "Erro desconhecido".to_string()),
                    );
                    break;
                }

                let key = (snapshot.status, snapshot.progress, snapshot.total, snapshot.done);
                if last != Some(key) {
                    last = Some(key);
                    yield JobEvent::Progress(snapshot.clone());
                }

                if last_ping.elapsed() >= manager.keepalive_interval {
                    last_ping = Instant::now();
                    yield JobEvent::Ping;
                }

                if snapshot.done {
                    yield JobEvent::Done;
                    break;
                }

                tokio::time::sleep(manager.poll_interval).await;
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job não encontrado: {0}")]
    NotFound(Uuid),

    #[error("Nenhum CNPJ encontrado no arquivo (válido ou inválido).")]
    EmptySubmission,

    #[error("Arquivo ainda não está pronto")]
    NotReady(Uuid),

    #[error("Falha ao gerar o arquivo de saída: {0}")]
    Export(#[from] ExportError),
}
