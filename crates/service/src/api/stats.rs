//! `GET /api/statistics` — job counts by status, plus a small completed/failed/
//! cancelled summary distinct from the full per-status map.

use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;

use super::state::AppState;

#[derive(Serialize)]
struct Totals {
    completed: usize,
    failed: usize,
    cancelled: usize,
}

#[derive(Serialize)]
struct StatisticsResponse {
    total_jobs: usize,
    active_jobs: usize,
    status_counts: std::collections::HashMap<cps_domain::job::JobStatus, usize>,
    totals: Totals,
}

pub async fn statistics(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.scheduler.statistics().await;
    let totals = Totals {
        completed: *stats.status_counts.get(&cps_domain::job::JobStatus::Completed).unwrap_or(&0),
        failed: *stats.status_counts.get(&cps_domain::job::JobStatus::Failed).unwrap_or(&0),
        cancelled: *stats.status_counts.get(&cps_domain::job::JobStatus::Cancelled).unwrap_or(&0),
    };
    axum::Json(StatisticsResponse {
        total_jobs: stats.total_jobs,
        active_jobs: stats.active_jobs,
        status_counts: stats.status_counts,
        totals,
    })
}
