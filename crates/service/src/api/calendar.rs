//! Calendar endpoints.
//!
//! - `POST /api/calendar/slots`              — reserve a standalone slot (no job)
//! - `GET  /api/calendar/day/:date`          — slots on a given day (YYYY-MM-DD)
//! - `GET  /api/calendar/week/:date`         — slots in the 7 days starting at `date`
//! - `GET  /api/calendar/suggestions`        — suggest open times
//! - `GET  /api/calendar/conflicts`          — diagnose overlapping/too-close slots

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use cps_domain::error::{Error, ErrorCategory};
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
    (
        status,
        Json(serde_json::json!({ "error": status.as_str(), "detail": err.to_string() })),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct ReserveSlotRequest {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    #[serde(default)]
    topic: String,
}

pub async fn create_slot(State(state): State<AppState>, Json(req): Json<ReserveSlotRequest>) -> Response {
    match state.calendar.reserve(req.start_time, req.end_time, None, req.topic) {
        Ok(slot) => (StatusCode::CREATED, Json(slot)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn day(State(state): State<AppState>, Path(date): Path<NaiveDate>) -> Response {
    Json(state.calendar.day_view(date)).into_response()
}

pub async fn week(State(state): State<AppState>, Path(date): Path<NaiveDate>) -> Response {
    Json(state.calendar.week_view(date)).into_response()
}

#[derive(Deserialize)]
pub struct SuggestQuery {
    #[serde(default = "default_count")]
    count: usize,
    from: Option<NaiveDate>,
    #[serde(default = "default_horizon_days")]
    horizon_days: u32,
}

fn default_count() -> usize {
    3
}
fn default_horizon_days() -> u32 {
    14
}

#[derive(Serialize)]
struct SuggestResponse {
    suggestions: Vec<DateTime<Utc>>,
}

pub async fn suggestions(State(state): State<AppState>, Query(query): Query<SuggestQuery>) -> Response {
    let from = query.from.unwrap_or_else(|| Utc::now().date_naive());
    if query.count == 0 {
        return api_error(StatusCode::BAD_REQUEST, "count must be greater than 0");
    }
    let suggestions = state.calendar.suggest(query.count, from, query.horizon_days, None);
    Json(SuggestResponse { suggestions }).into_response()
}

#[derive(Serialize)]
struct ConflictView {
    slot_a: String,
    slot_b: String,
    reason: String,
}

pub async fn conflicts(State(state): State<AppState>) -> Response {
    let conflicts: Vec<ConflictView> = state
        .calendar
        .conflicts()
        .into_iter()
        .map(|c| ConflictView {
            slot_a: c.slot_a,
            slot_b: c.slot_b,
            reason: c.reason,
        })
        .collect();
    Json(conflicts).into_response()
}
