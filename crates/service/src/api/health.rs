//! `GET /api/health` — liveness probe.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use super::state::AppState;

pub async fn health(State(_state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "scheduler_running": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
