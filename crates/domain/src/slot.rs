//! `CalendarSlot`: a reserved window on the production calendar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Reserved,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarSlot {
    pub id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub topic: String,
    pub status: SlotStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarSlot {
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        topic: String,
        job_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("slot_{}", Uuid::new_v4().simple()),
            job_id,
            start_time,
            end_time,
            topic,
            status: SlotStatus::Reserved,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn overlaps(&self, other_start: DateTime<Utc>, other_end: DateTime<Utc>) -> bool {
        self.start_time < other_end && other_start < self.end_time
    }
}
