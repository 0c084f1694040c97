//! `JobStore`: durable persistence for jobs, calendar slots, and recurring
//! schedules. The core only needs upsert/get/list/delete by id with status
//! filtering — this adapter backs that with three JSON snapshot files under
//! a configured directory. The in-memory maps are the hot path; the files on
//! disk are the source of truth across restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cps_domain::error::Result;
use cps_domain::job::{Job, JobStatus};
use cps_domain::schedule::RecurringSchedule;
use cps_domain::slot::CalendarSlot;
use tokio::sync::RwLock;

pub struct JobStore {
    dir: PathBuf,
    jobs: RwLock<HashMap<String, Job>>,
    slots: RwLock<HashMap<String, CalendarSlot>>,
    schedules: RwLock<HashMap<String, RecurringSchedule>>,
}

impl JobStore {
    /// Load existing state from `dir` (creating it if absent). Each
    /// collection that has never been written yet starts empty.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let jobs = read_collection(&dir.join("jobs.json")).unwrap_or_default();
        let slots = read_collection(&dir.join("slots.json")).unwrap_or_default();
        let schedules = read_collection(&dir.join("schedules.json")).unwrap_or_default();

        Ok(Self {
            dir,
            jobs: RwLock::new(jobs),
            slots: RwLock::new(slots),
            schedules: RwLock::new(schedules),
        })
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    pub async fn upsert_job(&self, job: Job) -> Result<()> {
        let snapshot = {
            let mut jobs = self.jobs.write().await;
            jobs.insert(job.id.clone(), job);
            jobs.clone()
        };
        persist(self.dir.join("jobs.json"), snapshot).await
    }

    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| status.map(|s| j.status == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn delete_job(&self, id: &str) -> Result<()> {
        let snapshot = {
            let mut jobs = self.jobs.write().await;
            jobs.remove(id);
            jobs.clone()
        };
        persist(self.dir.join("jobs.json"), snapshot).await
    }

    // ── Calendar slots ───────────────────────────────────────────────

    pub async fn upsert_slot(&self, slot: CalendarSlot) -> Result<()> {
        let snapshot = {
            let mut slots = self.slots.write().await;
            slots.insert(slot.id.clone(), slot);
            slots.clone()
        };
        persist(self.dir.join("slots.json"), snapshot).await
    }

    pub async fn get_slot(&self, id: &str) -> Option<CalendarSlot> {
        self.slots.read().await.get(id).cloned()
    }

    pub async fn list_slots(&self) -> Vec<CalendarSlot> {
        self.slots.read().await.values().cloned().collect()
    }

    pub async fn delete_slot(&self, id: &str) -> Result<()> {
        let snapshot = {
            let mut slots = self.slots.write().await;
            slots.remove(id);
            slots.clone()
        };
        persist(self.dir.join("slots.json"), snapshot).await
    }

    // ── Recurring schedules ──────────────────────────────────────────

    pub async fn upsert_schedule(&self, schedule: RecurringSchedule) -> Result<()> {
        let snapshot = {
            let mut schedules = self.schedules.write().await;
            schedules.insert(schedule.id.clone(), schedule);
            schedules.clone()
        };
        persist(self.dir.join("schedules.json"), snapshot).await
    }

    pub async fn get_schedule(&self, id: &str) -> Option<RecurringSchedule> {
        self.schedules.read().await.get(id).cloned()
    }

    pub async fn list_schedules(&self) -> Vec<RecurringSchedule> {
        self.schedules.read().await.values().cloned().collect()
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<()> {
        let snapshot = {
            let mut schedules = self.schedules.write().await;
            schedules.remove(id);
            schedules.clone()
        };
        persist(self.dir.join("schedules.json"), snapshot).await
    }
}

fn read_collection<T: serde::de::DeserializeOwned>(path: &Path) -> Option<HashMap<String, T>> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Serialize and write `data` to `path` off the async runtime, so a large
/// snapshot never stalls the executor thread the dispatcher and WebSocket
/// broadcaster also run on.
async fn persist<T: serde::Serialize + Send + 'static>(
    path: PathBuf,
    data: HashMap<String, T>,
) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let text = serde_json::to_string_pretty(&data)?;
        std::fs::write(&path, text)?;
        Ok(())
    })
    .await
    .map_err(|e| cps_domain::error::Error::Internal(format!("persist task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cps_domain::job::ScheduleRequest;

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::load(dir.path()).await.unwrap();
        let req = ScheduleRequest {
            topic: "A".into(),
            duration_seconds: 300,
            scheduled_at: Utc::now(),
            ..Default::default()
        };
        let job = Job::new(&req, Utc::now());
        let id = job.id.clone();
        store.upsert_job(job).await.unwrap();
        let fetched = store.get_job(&id).await.unwrap();
        assert_eq!(fetched.topic, "A");
    }

    #[tokio::test]
    async fn reloading_from_disk_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let req = ScheduleRequest {
            topic: "B".into(),
            duration_seconds: 120,
            scheduled_at: Utc::now(),
            ..Default::default()
        };
        let job = Job::new(&req, Utc::now());
        let id = job.id.clone();
        {
            let store = JobStore::load(dir.path()).await.unwrap();
            store.upsert_job(job).await.unwrap();
        }
        let reloaded = JobStore::load(dir.path()).await.unwrap();
        assert!(reloaded.get_job(&id).await.is_some());
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status_and_sorts_newest_first() {
        use cps_domain::job::JobStatus;

        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::load(dir.path()).await.unwrap();
        let base = Utc::now();
        let mut j1 = Job::new(
            &ScheduleRequest {
                topic: "first".into(),
                duration_seconds: 60,
                scheduled_at: base,
                ..Default::default()
            },
            base,
        );
        j1.status = JobStatus::Completed;
        let mut j2 = Job::new(
            &ScheduleRequest {
                topic: "second".into(),
                duration_seconds: 60,
                scheduled_at: base,
                ..Default::default()
            },
            base + chrono::Duration::seconds(1),
        );
        j2.status = JobStatus::Pending;

        store.upsert_job(j1).await.unwrap();
        store.upsert_job(j2.clone()).await.unwrap();

        let pending = store.list_jobs(Some(JobStatus::Pending)).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].topic, "second");

        let all = store.list_jobs(None).await;
        assert_eq!(all[0].topic, "second");
    }
}
