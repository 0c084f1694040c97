//! The `Job` aggregate: one unit of end-to-end video production.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::RetryPolicy;

/// Lifecycle status of a job. See [`JobStatus::can_transition_to`] for the
/// allowed transition graph — there is no path out of a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Pending, Scheduled) => true,
            (Pending, Cancelled) => true,
            (Scheduled, Running) => true,
            (Scheduled, Paused) => true,
            (Scheduled, Cancelled) => true,
            (Paused, Scheduled) => true,
            (Paused, Cancelled) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Running, Cancelled) => true,
            (Running, Scheduled) => true, // queued for a retry attempt
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Coarse pipeline phase within a job's current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Script,
    Assemble,
    Upload,
    Done,
    Error,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Queued => "queued",
            Stage::Script => "script",
            Stage::Assemble => "assemble",
            Stage::Upload => "upload",
            Stage::Done => "done",
            Stage::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Privacy setting forwarded opaquely to the uploader capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Unlisted,
    Private,
}

impl Default for Privacy {
    fn default() -> Self {
        Privacy::Public
    }
}

/// Artifacts produced by a completed job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One unit of end-to-end video production: script -> assemble -> upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub style: String,
    pub duration_seconds: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub privacy: Privacy,

    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub publish_at: Option<DateTime<Utc>>,

    pub status: JobStatus,
    #[serde(default)]
    pub progress_percent: u8,
    #[serde(default = "default_stage")]
    pub stage: Stage,
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub attempt_count: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<JobResult>,

    /// Slot reserved on the calendar for this job, if any.
    #[serde(default)]
    pub slot_id: Option<String>,
    /// Source recurring schedule, when this job was materialised rather than
    /// submitted directly.
    #[serde(default)]
    pub source_schedule_id: Option<String>,

    #[serde(skip_serializing_if = "retry_policy_is_default", default)]
    pub retry_policy: RetryPolicy,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_stage() -> Stage {
    Stage::Queued
}

fn retry_policy_is_default(p: &RetryPolicy) -> bool {
    p == &RetryPolicy::default()
}

impl Job {
    pub fn new(req: &ScheduleRequest, now: DateTime<Utc>) -> Self {
        let max_attempts = req.max_attempts.unwrap_or(3).max(1);
        // When the caller names an explicit `RetryPolicy` it wins outright;
        // otherwise `max_attempts` (total attempts, including the first)
        // drives the default policy's `max_retries` (retries *after* the
        // first) so the two fields on the request can't silently disagree.
        let retry_policy = req.retry_policy.clone().unwrap_or_else(|| RetryPolicy {
            max_retries: max_attempts - 1,
            ..RetryPolicy::default()
        });
        Self {
            id: format!("job_{}", Uuid::new_v4().simple()),
            topic: req.topic.clone(),
            style: req.style.clone().unwrap_or_default(),
            duration_seconds: req.duration_seconds,
            tags: req.tags.clone(),
            category: req.category.clone(),
            privacy: req.privacy.unwrap_or_default(),
            scheduled_at: req.scheduled_at,
            publish_at: req.publish_at,
            status: JobStatus::Pending,
            progress_percent: 0,
            stage: Stage::Queued,
            priority: req.priority.unwrap_or(0),
            attempt_count: 0,
            max_attempts,
            next_retry_at: None,
            error_message: None,
            result: None,
            slot_id: None,
            source_schedule_id: req.source_schedule_id.clone(),
            retry_policy,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn set_status(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

/// Request body accepted by `ContentScheduler::schedule`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub topic: String,
    #[serde(default)]
    pub style: Option<String>,
    pub duration_seconds: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub privacy: Option<Privacy>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub publish_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub source_schedule_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_accept_no_further_transition() {
        for s in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(!s.can_transition_to(JobStatus::Running));
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn pending_can_reach_scheduled_and_cancelled_only() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Scheduled));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn paused_reachable_only_from_scheduled() {
        assert!(JobStatus::Scheduled.can_transition_to(JobStatus::Paused));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Paused));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Paused));
    }

    #[test]
    fn display_is_lower_snake_case() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(Stage::Assemble.to_string(), "assemble");
    }

    #[test]
    fn max_attempts_alone_drives_the_default_retry_policy() {
        let req = ScheduleRequest {
            topic: "A".into(),
            duration_seconds: 60,
            scheduled_at: Utc::now(),
            max_attempts: Some(5),
            ..Default::default()
        };
        let job = Job::new(&req, Utc::now());
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.retry_policy.max_retries, 4);
    }

    #[test]
    fn explicit_retry_policy_overrides_max_attempts_derivation() {
        let req = ScheduleRequest {
            topic: "A".into(),
            duration_seconds: 60,
            scheduled_at: Utc::now(),
            max_attempts: Some(5),
            retry_policy: Some(RetryPolicy {
                max_retries: 1,
                ..RetryPolicy::default()
            }),
            ..Default::default()
        };
        let job = Job::new(&req, Utc::now());
        assert_eq!(job.retry_policy.max_retries, 1);
    }
}
