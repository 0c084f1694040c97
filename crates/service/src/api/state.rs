//! Shared application state handed to every axum handler.

use std::sync::Arc;

use crate::calendar::CalendarManager;
use crate::events::EventBus;
use crate::recurring::RecurringScheduler;
use crate::scheduler::ContentScheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<ContentScheduler>,
    pub recurring: Arc<RecurringScheduler>,
    pub calendar: Arc<CalendarManager>,
    pub events: EventBus,
    pub ws_idle_timeout_seconds: u64,
}
