use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use garde::Validate;
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::batch::{CancelResponse, ProgressPayload, SubmitQuery, SubmitResponse};
use crate::models::job::{JobSnapshot, OutputFormat};
use crate::routes::error::ApiError;
use crate::services::jobs::{JobEvent, JobRequest};
use crate::services::upload;

/// Reconnect hint sent with the `open` event.
const SSE_RETRY: Duration = Duration::from_millis(5000);

/// POST /jobs — Upload a CSV/XLSX/XLS file and start a batch lookup.
pub async fn submit_job(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    query.validate()?;

    let output_format = match query.output.as_deref().map(str::trim) {
        None | Some("") => OutputFormat::default(),
        Some(s) => s
            .parse::<OutputFormat>()
            .map_err(|_| ApiError::BadRequest("output deve ser csv ou xlsx".to_string()))?,
    };

    // The runner raises anything below its floor, negative values included.
    let min_delay = query.min_delay().unwrap_or(state.default_delay);

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await?;
            upload = Some((file_name, data));
        }
    }

    let (file_name, data) = upload
        .ok_or_else(|| ApiError::BadRequest("Envie o arquivo no campo 'file'.".to_string()))?;

    let parsed = upload::parse_upload(&file_name, &data)?;
    tracing::info!(
        file_name = %file_name,
        column = ?parsed.column,
        valid = parsed.cnpjs.len(),
        invalid = parsed.invalid_rows.len(),
        "Upload parsed"
    );

    let job_id = state.jobs.submit(JobRequest {
        cnpjs: parsed.cnpjs,
        invalid_rows: parsed.invalid_rows,
        output_format,
        min_delay,
    })?;

    Ok(Json(SubmitResponse { job_id }))
}

/// GET /jobs/{id}/status — Current job snapshot.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let id = parse_id(&job_id)?;
    Ok(Json(state.jobs.get_status(id)?))
}

/// POST /jobs/{id}/cancel — Request cooperative cancellation.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = parse_id(&job_id)?;
    let status = state.jobs.cancel(id)?;
    Ok(Json(CancelResponse { ok: true, status }))
}

/// GET /jobs/{id}/events — Server-sent progress stream.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let id = parse_id(&job_id)?;
    let events = state.jobs.subscribe(id)?;
    Ok(Sse::new(events.map(|e| Ok(to_sse(e)))))
}

/// GET /jobs/{id}/download — Result file of a finished (or canceled) job.
pub async fn download_output(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&job_id)?;
    let output = state.jobs.get_output(id)?;

    let headers = [
        (header::CONTENT_TYPE, output.media_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", output.file_name),
        ),
    ];
    Ok((headers, output.bytes).into_response())
}

/// Malformed ids can never match a job.
fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("job não encontrado".to_string()))
}

fn to_sse(event: JobEvent) -> Event {
    match event {
        JobEvent::Open => Event::default().event("open").data("ok").retry(SSE_RETRY),
        JobEvent::Progress(snapshot) => {
            let payload = ProgressPayload::from(&snapshot);
            Event::default()
                .event("progress")
                .data(serde_json::to_string(&payload).unwrap_or_default())
        }
        JobEvent::Ping => Event::default().event("ping").data("keepalive"),
        JobEvent::Error(message) => Event::default().event("error").data(message),
        JobEvent::Done => Event::default().event("done").data("ok"),
    }
}
