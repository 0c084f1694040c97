//! Recurring-schedule endpoints.
//!
//! - `POST   /api/recurring`             — create a schedule (pattern tagged by `kind`)
//! - `GET    /api/recurring`              — list schedules
//! - `GET    /api/recurring/:id`          — fetch one schedule
//! - `POST   /api/recurring/:id/pause`    — pause
//! - `POST   /api/recurring/:id/resume`   — resume
//! - `DELETE /api/recurring/:id`          — delete

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, Weekday};
use cps_domain::error::{Error, ErrorCategory};
use cps_domain::schedule::{MissedPolicy, ScheduleDefaults};
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

/// The inbound `pattern` is tagged by `kind` — `daily`, `weekly`, `monthly`,
/// `interval`, or `cron` — following the same `#[serde(tag = "kind")]`
/// convention as `cps_domain::schedule::Pattern` itself.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PatternRequest {
    Daily { hour: u32, minute: u32 },
    Weekly { weekdays: Vec<Weekday>, hour: u32, minute: u32 },
    Monthly { days_of_month: Vec<u32>, hour: u32, minute: u32 },
    Interval { seconds: u64 },
    Cron { expression: String },
}

#[derive(Deserialize)]
pub struct CreateRequest {
    name: String,
    pattern: PatternRequest,
    topic_template: String,
    #[serde(default = "default_timezone")]
    timezone: String,
    start_date: NaiveDate,
    #[serde(default)]
    end_date: Option<NaiveDate>,
    #[serde(default)]
    defaults: ScheduleDefaults,
    #[serde(default)]
    missed_policy: MissedPolicy,
}

fn default_timezone() -> String {
    "UTC".into()
}

#[derive(Serialize)]
struct CreateResponse {
    schedule_id: String,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> Response {
    let recurring = &state.recurring;
    let result = match req.pattern {
        PatternRequest::Daily { hour, minute } => {
            recurring
                .create_daily(
                    req.name,
                    hour,
                    minute,
                    req.topic_template,
                    req.timezone,
                    req.start_date,
                    req.end_date,
                    req.defaults,
                    req.missed_policy,
                )
                .await
        }
        PatternRequest::Weekly { weekdays, hour, minute } => {
            recurring
                .create_weekly(
                    req.name,
                    weekdays,
                    hour,
                    minute,
                    req.topic_template,
                    req.timezone,
                    req.start_date,
                    req.end_date,
                    req.defaults,
                    req.missed_policy,
                )
                .await
        }
        PatternRequest::Monthly { days_of_month, hour, minute } => {
            recurring
                .create_monthly(
                    req.name,
                    days_of_month,
                    hour,
                    minute,
                    req.topic_template,
                    req.timezone,
                    req.start_date,
                    req.end_date,
                    req.defaults,
                    req.missed_policy,
                )
                .await
        }
        PatternRequest::Interval { seconds } => {
            recurring
                .create_interval(
                    req.name,
                    seconds,
                    req.topic_template,
                    req.timezone,
                    req.start_date,
                    req.end_date,
                    req.defaults,
                    req.missed_policy,
                )
                .await
        }
        PatternRequest::Cron { expression } => {
            recurring
                .create_cron(
                    req.name,
                    expression,
                    req.topic_template,
                    req.timezone,
                    req.start_date,
                    req.end_date,
                    req.defaults,
                    req.missed_policy,
                )
                .await
        }
    };

    match result {
        Ok(schedule_id) => (StatusCode::CREATED, Json(CreateResponse { schedule_id })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list(State(state): State<AppState>) -> Response {
    Json(state.recurring.list().await).into_response()
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.recurring.get(&id).await {
        Some(schedule) => Json(schedule).into_response(),
        None => api_error(StatusCode::NOT_FOUND, format!("schedule {id} not found")),
    }
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.recurring.pause(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.recurring.resume(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.recurring.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}
