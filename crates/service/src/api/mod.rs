//! HTTP + WebSocket surface. Routes are split by resource, one file per
//! concern, the way the rest of this workspace's API layer is organised.

pub mod calendar;
pub mod health;
pub mod jobs;
pub mod recurring;
pub mod state;
pub mod stats;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/jobs/schedule", post(jobs::schedule))
        .route("/api/jobs", get(jobs::list))
        .route("/api/jobs/:id", get(jobs::get))
        .route("/api/jobs/:id/cancel", post(jobs::cancel))
        .route("/api/jobs/:id/pause", post(jobs::pause))
        .route("/api/jobs/:id/resume", post(jobs::resume))
        .route("/api/recurring", get(recurring::list).post(recurring::create))
        .route("/api/recurring/:id", get(recurring::get).delete(recurring::delete))
        .route("/api/recurring/:id/pause", post(recurring::pause))
        .route("/api/recurring/:id/resume", post(recurring::resume))
        .route("/api/calendar/slots", post(calendar::create_slot))
        .route("/api/calendar/day/:date", get(calendar::day))
        .route("/api/calendar/week/:date", get(calendar::week))
        .route("/api/calendar/suggestions", get(calendar::suggestions))
        .route("/api/calendar/conflicts", get(calendar::conflicts))
        .route("/api/statistics", get(stats::statistics))
        .route("/ws", get(ws::upgrade))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
