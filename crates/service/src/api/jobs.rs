//! Job endpoints.
//!
//! - `POST /api/jobs/schedule`       — schedule a new job
//! - `GET  /api/jobs`                — list jobs, optionally filtered by status
//! - `GET  /api/jobs/:id`            — fetch one job
//! - `POST /api/jobs/:id/cancel`     — cancel a job
//! - `POST /api/jobs/:id/pause`      — pause a scheduled job
//! - `POST /api/jobs/:id/resume`     — resume a paused job

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cps_domain::error::{Error, ErrorCategory};
use cps_domain::job::{JobStatus, ScheduleRequest};
use serde::{Deserialize, Serialize};

use super::state::AppState;

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn error_response(err: Error) -> Response {
    let status = match err.category() {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Terminal => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let field = match &err {
        Error::Validation { field, .. } => Some(field.clone()),
        _ => None,
    };
    (
        status,
        Json(serde_json::json!({ "error": status.as_str(), "detail": err.to_string(), "field": field })),
    )
        .into_response()
}

#[derive(Serialize)]
struct ScheduleResponse {
    job_id: String,
}

pub async fn schedule(State(state): State<AppState>, Json(req): Json<ScheduleRequest>) -> Response {
    match state.scheduler.schedule(req).await {
        Ok(job_id) => (StatusCode::CREATED, Json(ScheduleResponse { job_id })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<JobStatus>,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let jobs = state.scheduler.list(query.status).await;
    Json(jobs).into_response()
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.get(&id).await {
        Some(job) => Json(job).into_response(),
        None => api_error(StatusCode::NOT_FOUND, format!("job {id} not found")),
    }
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.cancel(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.pause(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.resume(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}
