//! `ContentScheduler`: the top-level orchestrator. Owns the job lifecycle,
//! the dispatch loop that promotes due jobs into the executor, and the
//! glue that turns pipeline stage updates into persisted state and
//! published events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cps_capabilities::no_progress;
use cps_domain::config::SchedulerConfig;
use cps_domain::error::{Error, Result};
use cps_domain::event::JobEvent;
use cps_domain::job::{Job, JobStatus, ScheduleRequest, Stage};
use cps_domain::slot::SlotStatus;
use parking_lot::Mutex;
use serde::Serialize;

use crate::calendar::CalendarManager;
use crate::events::EventBus;
use crate::executor::{ExecutionOutcome, JobExecutor};
use crate::pipeline::{self, Capabilities, StageCallback, StageUpdate};
use crate::store::JobStore;

/// How far into the past `scheduled_at` may fall and still be accepted —
/// accounts for request latency between a client computing "now" and the
/// server validating it.
const SCHEDULE_GRACE_SECONDS: i64 = 60;
const MIN_DURATION_SECONDS: u32 = 60;
const MAX_DURATION_SECONDS: u32 = 3600;

/// A buffer added before/after a job's own runtime when reserving its slot.
const SLOT_BUFFER_SECONDS: i64 = 300;

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub status_counts: HashMap<JobStatus, usize>,
}

pub struct ContentScheduler {
    store: Arc<JobStore>,
    calendar: Arc<CalendarManager>,
    executor: Arc<JobExecutor>,
    events: EventBus,
    capabilities: Arc<Capabilities>,
    config: SchedulerConfig,
    last_progress_emit: Mutex<HashMap<String, Instant>>,
}

impl ContentScheduler {
    pub fn new(
        store: Arc<JobStore>,
        calendar: Arc<CalendarManager>,
        executor: Arc<JobExecutor>,
        events: EventBus,
        capabilities: Arc<Capabilities>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            calendar,
            executor,
            events,
            capabilities,
            config,
            last_progress_emit: Mutex::new(HashMap::new()),
        })
    }

    fn validate(&self, req: &ScheduleRequest, now: DateTime<Utc>) -> Result<()> {
        if req.topic.trim().is_empty() {
            return Err(Error::validation("topic", "must not be empty"));
        }
        if req.duration_seconds < MIN_DURATION_SECONDS || req.duration_seconds > MAX_DURATION_SECONDS {
            return Err(Error::validation(
                "duration_seconds",
                format!("must be between {MIN_DURATION_SECONDS} and {MAX_DURATION_SECONDS}"),
            ));
        }
        if req.scheduled_at < now - ChronoDuration::seconds(SCHEDULE_GRACE_SECONDS) {
            return Err(Error::validation("scheduled_at", "must not be in the past"));
        }
        if let Some(publish_at) = req.publish_at {
            if publish_at < req.scheduled_at {
                return Err(Error::validation(
                    "publish_at",
                    "must be at or after scheduled_at",
                ));
            }
        }
        Ok(())
    }

    /// Validate the request, reserve a calendar slot, and persist the job.
    /// The slot is released if persistence fails, keeping the calendar and
    /// the store consistent.
    pub async fn schedule(&self, req: ScheduleRequest) -> Result<String> {
        let now = Utc::now();
        self.validate(&req, now)?;

        let end_time = req.scheduled_at + ChronoDuration::seconds(req.duration_seconds as i64 + SLOT_BUFFER_SECONDS);
        let slot = self
            .calendar
            .reserve(req.scheduled_at, end_time, None, req.topic.clone())?;

        let mut job = Job::new(&req, now);
        job.slot_id = Some(slot.id.clone());
        job.set_status(JobStatus::Scheduled, now);

        if let Err(e) = self.store.upsert_job(job.clone()).await {
            let _ = self.calendar.release(&slot.id);
            return Err(e);
        }

        let mut bound_slot = slot;
        bound_slot.job_id = Some(job.id.clone());
        let _ = self.store.upsert_slot(bound_slot).await;

        self.events.publish(JobEvent::JobCreated {
            job_id: job.id.clone(),
            topic: job.topic.clone(),
            scheduled_at: job.scheduled_at,
        });
        Ok(job.id)
    }

    /// Processes requests in order; a per-item failure does not abort the
    /// rest of the batch.
    pub async fn schedule_batch(&self, requests: Vec<ScheduleRequest>) -> Vec<Result<String>> {
        let mut out = Vec::with_capacity(requests.len());
        for req in requests {
            out.push(self.schedule(req).await);
        }
        out
    }

    pub async fn get(&self, job_id: &str) -> Option<Job> {
        self.store.get_job(job_id).await
    }

    pub async fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        self.store.list_jobs(status).await
    }

    /// Moves PENDING/SCHEDULED/RUNNING/PAUSED to CANCELLED. A second call on
    /// an already-cancelled job is a no-op, not an error.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let mut job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| Error::not_found("job", job_id))?;

        if job.status == JobStatus::Cancelled {
            return Ok(());
        }
        if job.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "job {job_id} is already {}",
                job.status
            )));
        }

        let was_running = job.status == JobStatus::Running;
        job.set_status(JobStatus::Cancelled, Utc::now());
        self.store.upsert_job(job.clone()).await?;

        if was_running {
            self.executor.cancel(job_id);
        }
        self.release_slot(&job).await;

        self.events.publish(JobEvent::JobCancelled {
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    pub async fn pause(&self, job_id: &str) -> Result<()> {
        let mut job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| Error::not_found("job", job_id))?;
        if !job.status.can_transition_to(JobStatus::Paused) {
            return Err(Error::Conflict(format!(
                "cannot pause job in status {}",
                job.status
            )));
        }
        job.set_status(JobStatus::Paused, Utc::now());
        self.store.upsert_job(job).await?;
        self.events.publish(JobEvent::JobPaused {
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    pub async fn resume(&self, job_id: &str) -> Result<()> {
        let mut job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| Error::not_found("job", job_id))?;
        if !job.status.can_transition_to(JobStatus::Scheduled) {
            return Err(Error::Conflict(format!(
                "cannot resume job in status {}",
                job.status
            )));
        }
        job.set_status(JobStatus::Scheduled, Utc::now());
        self.store.upsert_job(job).await?;
        self.events.publish(JobEvent::JobResumed {
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    pub async fn statistics(&self) -> Statistics {
        let jobs = self.store.list_jobs(None).await;
        let mut status_counts: HashMap<JobStatus, usize> = HashMap::new();
        for job in &jobs {
            *status_counts.entry(job.status).or_insert(0) += 1;
        }
        let active_jobs = *status_counts.get(&JobStatus::Running).unwrap_or(&0);
        Statistics {
            total_jobs: jobs.len(),
            active_jobs,
            status_counts,
        }
    }

    /// On startup, jobs left in RUNNING by a prior crash cannot be resumed
    /// mid-pipeline (external capabilities may already have side effects) —
    /// they are marked FAILED with a fixed reason and their slot released.
    pub async fn recover_interrupted_jobs(&self) {
        for mut job in self.store.list_jobs(Some(JobStatus::Running)).await {
            job.status = JobStatus::Failed;
            job.stage = Stage::Error;
            job.error_message = Some("interrupted".into());
            job.completed_at = Some(Utc::now());
            job.updated_at = Utc::now();
            self.release_slot(&job).await;
            let _ = self.store.upsert_job(job).await;
        }
    }

    /// Scan for due, non-paused SCHEDULED jobs and submit as many as fit
    /// within the configured concurrency cap. Returns the number dispatched.
    pub async fn dispatch_once(self: &Arc<Self>) -> usize {
        let now = Utc::now();
        let running_count = self.store.list_jobs(Some(JobStatus::Running)).await.len();
        let capacity = self.config.max_concurrent_jobs.saturating_sub(running_count);
        if capacity == 0 {
            return 0;
        }

        let mut due: Vec<Job> = self
            .store
            .list_jobs(Some(JobStatus::Scheduled))
            .await
            .into_iter()
            .filter(|j| j.scheduled_at <= now)
            .collect();
        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(b.priority.cmp(&a.priority)));
        due.truncate(capacity);

        let mut dispatched = 0;
        for mut job in due {
            job.set_status(JobStatus::Running, now);
            job.started_at = Some(now);
            job.attempt_count = 0;
            if self.store.upsert_job(job.clone()).await.is_err() {
                continue;
            }
            dispatched += 1;
            self.spawn_run(job);
        }
        dispatched
    }

    fn spawn_run(self: &Arc<Self>, job: Job) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run_job(job).await;
        });
    }

    async fn run_job(self: Arc<Self>, job: Job) {
        let job_id = job.id.clone();
        let retry_policy = job.retry_policy.clone();
        let capabilities = Arc::clone(&self.capabilities);

        let on_update: StageCallback = {
            let scheduler = Arc::clone(&self);
            let job_id = job_id.clone();
            Arc::new(move |update: StageUpdate| {
                let scheduler = Arc::clone(&scheduler);
                let job_id = job_id.clone();
                tokio::spawn(async move {
                    scheduler.apply_stage_update(&job_id, update).await;
                });
            })
        };

        let attempt_counter = Arc::new(AtomicU32::new(0));
        let store_for_attempt = Arc::clone(&self.store);
        let job_id_for_attempt = job_id.clone();

        let outcome = self
            .executor
            .execute(&job_id, &retry_policy, no_progress(), move |_progress, cancel| {
                let capabilities = Arc::clone(&capabilities);
                let job = job.clone();
                let on_update = on_update.clone();
                let store = Arc::clone(&store_for_attempt);
                let job_id = job_id_for_attempt.clone();
                let attempt_counter = Arc::clone(&attempt_counter);
                async move {
                    let attempt = attempt_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(mut stored) = store.get_job(&job_id).await {
                        stored.attempt_count = attempt;
                        stored.updated_at = Utc::now();
                        let _ = store.upsert_job(stored).await;
                    }
                    pipeline::run(&capabilities, &job, on_update, cancel).await
                }
            })
            .await;

        self.finalize_job(&job_id, outcome).await;
    }

    async fn apply_stage_update(&self, job_id: &str, update: StageUpdate) {
        let Some(mut job) = self.store.get_job(job_id).await else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }
        let stage_changed = job.stage != update.stage;
        job.stage = update.stage;
        job.progress_percent = job.progress_percent.max(update.progress);
        job.updated_at = Utc::now();
        let status = job.status;
        let stage = job.stage;
        let progress = job.progress_percent;
        let _ = self.store.upsert_job(job).await;

        if stage_changed || progress >= 100 || self.progress_throttle_elapsed(job_id) {
            self.events.publish(JobEvent::JobUpdate {
                job_id: job_id.to_string(),
                status,
                stage,
                progress,
            });
        }
    }

    /// At most one progress publish per 500ms per job, to bound WebSocket
    /// traffic from fine-grained assemble/upload progress callbacks.
    fn progress_throttle_elapsed(&self, job_id: &str) -> bool {
        let mut last = self.last_progress_emit.lock();
        let now = Instant::now();
        let should = match last.get(job_id) {
            Some(prev) => now.duration_since(*prev) >= std::time::Duration::from_millis(500),
            None => true,
        };
        if should {
            last.insert(job_id.to_string(), now);
        }
        should
    }

    async fn finalize_job(&self, job_id: &str, outcome: ExecutionOutcome<cps_domain::job::JobResult>) {
        let Some(mut job) = self.store.get_job(job_id).await else {
            return;
        };
        let now = Utc::now();
        let mut publish: Option<JobEvent> = None;

        match outcome {
            ExecutionOutcome::Completed(result) => {
                job.status = JobStatus::Completed;
                job.stage = Stage::Done;
                job.progress_percent = 100;
                job.completed_at = Some(now);
                job.result = Some(result);
                job.error_message = None;
                self.complete_slot(&job).await;
                publish = Some(JobEvent::JobUpdate {
                    job_id: job_id.to_string(),
                    status: job.status,
                    stage: job.stage,
                    progress: job.progress_percent,
                });
            }
            ExecutionOutcome::Failed(err) => {
                job.status = JobStatus::Failed;
                job.stage = Stage::Error;
                job.error_message = Some(err.to_string());
                job.completed_at = Some(now);
                self.release_slot(&job).await;
                publish = Some(JobEvent::JobUpdate {
                    job_id: job_id.to_string(),
                    status: job.status,
                    stage: job.stage,
                    progress: job.progress_percent,
                });
            }
            ExecutionOutcome::TimedOut => {
                job.status = JobStatus::Failed;
                job.stage = Stage::Error;
                job.error_message = Some("operation timed out".into());
                job.completed_at = Some(now);
                self.release_slot(&job).await;
                publish = Some(JobEvent::JobUpdate {
                    job_id: job_id.to_string(),
                    status: job.status,
                    stage: job.stage,
                    progress: job.progress_percent,
                });
            }
            ExecutionOutcome::Cancelled => {
                // Status may already be CANCELLED if `cancel()` raced us here.
                if job.status != JobStatus::Cancelled {
                    job.status = JobStatus::Cancelled;
                    self.release_slot(&job).await;
                    publish = Some(JobEvent::JobCancelled {
                        job_id: job_id.to_string(),
                    });
                }
            }
        }

        job.updated_at = now;
        let _ = self.store.upsert_job(job).await;
        if let Some(event) = publish {
            self.events.publish(event);
        }
    }

    async fn release_slot(&self, job: &Job) {
        let Some(slot_id) = &job.slot_id else { return };
        let _ = self.calendar.release(slot_id);
        if let Some(mut slot) = self.store.get_slot(slot_id).await {
            slot.status = SlotStatus::Cancelled;
            slot.updated_at = Utc::now();
            let _ = self.store.upsert_slot(slot).await;
        }
    }

    async fn complete_slot(&self, job: &Job) {
        let Some(slot_id) = &job.slot_id else { return };
        let _ = self.calendar.complete(slot_id);
        if let Some(mut slot) = self.store.get_slot(slot_id).await {
            slot.status = SlotStatus::Completed;
            slot.updated_at = Utc::now();
            let _ = self.store.upsert_slot(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarManager;
    use crate::runtime::cancel::CancelMap;
    use cps_capabilities::mock::{MockScriptGenerator, MockVideoAssembler, MockYoutubeUploader};
    use cps_domain::config::CalendarConfig;

    async fn harness() -> (Arc<ContentScheduler>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::load(dir.path()).await.unwrap());
        let calendar = Arc::new(CalendarManager::new(CalendarConfig {
            min_gap_hours: 6,
            max_per_day: 3,
            preferred_hours: vec![10, 14, 18],
            blackout_dates: vec![],
        }));
        let executor = Arc::new(JobExecutor::new(2, Arc::new(CancelMap::new())));
        let capabilities = Arc::new(Capabilities {
            scripts: Arc::new(MockScriptGenerator),
            assembler: Arc::new(MockVideoAssembler),
            uploader: Arc::new(MockYoutubeUploader),
        });
        let scheduler = ContentScheduler::new(
            store,
            calendar,
            executor,
            EventBus::new(),
            capabilities,
            SchedulerConfig {
                max_concurrent_jobs: 2,
                ..SchedulerConfig::default()
            },
        );
        (scheduler, dir)
    }

    fn request(topic: &str, scheduled_at: DateTime<Utc>) -> ScheduleRequest {
        ScheduleRequest {
            topic: topic.into(),
            duration_seconds: 300,
            scheduled_at,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn schedule_then_get_roundtrips_inputs() {
        let (scheduler, _dir) = harness().await;
        let when = Utc::now() + ChronoDuration::hours(1);
        let id = scheduler.schedule(request("A", when)).await.unwrap();
        let job = scheduler.get(&id).await.unwrap();
        assert_eq!(job.topic, "A");
        assert_eq!(job.status, JobStatus::Scheduled);
    }

    #[tokio::test]
    async fn second_conflicting_reservation_is_rejected() {
        let (scheduler, _dir) = harness().await;
        let base = Utc::now() + ChronoDuration::hours(1);
        scheduler.schedule(request("first", base)).await.unwrap();
        let result = scheduler
            .schedule(request("second", base + ChronoDuration::minutes(30)))
            .await;
        assert!(result.is_err());
        assert_eq!(scheduler.list(None).await.len(), 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (scheduler, _dir) = harness().await;
        let when = Utc::now() + ChronoDuration::hours(1);
        let id = scheduler.schedule(request("A", when)).await.unwrap();
        scheduler.cancel(&id).await.unwrap();
        scheduler.cancel(&id).await.unwrap();
        let job = scheduler.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_releases_slot_for_reuse() {
        let (scheduler, _dir) = harness().await;
        let when = Utc::now() + ChronoDuration::hours(1);
        let id = scheduler.schedule(request("A", when)).await.unwrap();
        scheduler.cancel(&id).await.unwrap();
        let second = scheduler.schedule(request("B", when)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_status() {
        let (scheduler, _dir) = harness().await;
        let when = Utc::now() + ChronoDuration::hours(1);
        let id = scheduler.schedule(request("A", when)).await.unwrap();
        scheduler.pause(&id).await.unwrap();
        assert_eq!(scheduler.get(&id).await.unwrap().status, JobStatus::Paused);
        scheduler.resume(&id).await.unwrap();
        assert_eq!(scheduler.get(&id).await.unwrap().status, JobStatus::Scheduled);
    }

    #[tokio::test]
    async fn dispatch_runs_due_job_to_completion() {
        let (scheduler, _dir) = harness().await;
        let when = Utc::now() - ChronoDuration::seconds(1);
        let id = scheduler.schedule(request("A", when)).await.unwrap();

        let dispatched = scheduler.dispatch_once().await;
        assert_eq!(dispatched, 1);

        let mut job = scheduler.get(&id).await.unwrap();
        for _ in 0..200 {
            if job.status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            job = scheduler.get(&id).await.unwrap();
        }
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        assert!(job.result.is_some());
    }

    #[tokio::test]
    async fn statistics_reflects_status_counts() {
        let (scheduler, _dir) = harness().await;
        let when = Utc::now() + ChronoDuration::hours(1);
        scheduler.schedule(request("A", when)).await.unwrap();
        let stats = scheduler.statistics().await;
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(*stats.status_counts.get(&JobStatus::Scheduled).unwrap(), 1);
    }

    #[tokio::test]
    async fn recover_interrupted_jobs_marks_running_as_failed() {
        let (scheduler, _dir) = harness().await;
        let when = Utc::now() + ChronoDuration::hours(1);
        let id = scheduler.schedule(request("A", when)).await.unwrap();
        let mut job = scheduler.get(&id).await.unwrap();
        job.status = JobStatus::Running;
        scheduler.store.upsert_job(job).await.unwrap();

        scheduler.recover_interrupted_jobs().await;

        let recovered = scheduler.get(&id).await.unwrap();
        assert_eq!(recovered.status, JobStatus::Failed);
        assert_eq!(recovered.error_message.as_deref(), Some("interrupted"));
    }
}
