//! Events published on the internal state-change bus and broadcast to
//! WebSocket clients verbatim as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobStatus, Stage};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    JobCreated {
        job_id: String,
        topic: String,
        scheduled_at: DateTime<Utc>,
    },
    JobCancelled {
        job_id: String,
    },
    JobPaused {
        job_id: String,
    },
    JobResumed {
        job_id: String,
    },
    JobUpdate {
        job_id: String,
        status: JobStatus,
        stage: Stage,
        progress: u8,
    },
    Connection {
        message: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobEvent::JobCreated { job_id, .. }
            | JobEvent::JobCancelled { job_id }
            | JobEvent::JobPaused { job_id }
            | JobEvent::JobResumed { job_id }
            | JobEvent::JobUpdate { job_id, .. } => Some(job_id),
            JobEvent::Connection { .. } => None,
        }
    }
}
