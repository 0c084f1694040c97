//! `RecurringScheduler`: expands `RecurringSchedule` patterns into concrete
//! jobs at their fire times. Creation validates eagerly (cron grammar,
//! timezone) the same way the calendar validates a reservation eagerly,
//! rather than discovering a bad pattern only when it first tries to fire.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike, TimeZone, Utc, Weekday,
};
use cps_domain::error::{Error, Result};
use cps_domain::job::ScheduleRequest;
use cps_domain::schedule::{MissedPolicy, Pattern, RecurringSchedule, ScheduleDefaults};
use std::sync::Arc;

use crate::runtime::cron::{cron_next_tz, parse_tz};
use crate::runtime::validation::{validate_cron, validate_timezone};
use crate::scheduler::ContentScheduler;
use crate::store::JobStore;

/// Bound on how many missed fire windows a `CatchUp` schedule will
/// materialise in a single tick, so a process that was asleep for a year
/// cannot flood the queue.
const MAX_CATCHUP_PER_TICK: u32 = 20;

/// Months searched forward when resolving a monthly pattern's next day —
/// generous enough that a `days_of_month: [31]` pattern still resolves even
/// if several consecutive months lack a 31st.
const MONTHLY_SEARCH_MONTHS: u32 = 36;

pub struct RecurringScheduler {
    store: Arc<JobStore>,
    scheduler: Arc<ContentScheduler>,
}

impl RecurringScheduler {
    pub fn new(store: Arc<JobStore>, scheduler: Arc<ContentScheduler>) -> Arc<Self> {
        Arc::new(Self { store, scheduler })
    }

    pub async fn create_daily(
        &self,
        name: String,
        hour: u32,
        minute: u32,
        topic_template: String,
        timezone: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        defaults: ScheduleDefaults,
        missed_policy: MissedPolicy,
    ) -> Result<String> {
        self.create(
            name,
            Pattern::Daily { hour, minute },
            topic_template,
            timezone,
            start_date,
            end_date,
            defaults,
            missed_policy,
        )
        .await
    }

    pub async fn create_weekly(
        &self,
        name: String,
        weekdays: Vec<Weekday>,
        hour: u32,
        minute: u32,
        topic_template: String,
        timezone: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        defaults: ScheduleDefaults,
        missed_policy: MissedPolicy,
    ) -> Result<String> {
        if weekdays.is_empty() {
            return Err(Error::validation("weekdays", "must name at least one day"));
        }
        self.create(
            name,
            Pattern::Weekly { weekdays, hour, minute },
            topic_template,
            timezone,
            start_date,
            end_date,
            defaults,
            missed_policy,
        )
        .await
    }

    pub async fn create_monthly(
        &self,
        name: String,
        days_of_month: Vec<u32>,
        hour: u32,
        minute: u32,
        topic_template: String,
        timezone: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        defaults: ScheduleDefaults,
        missed_policy: MissedPolicy,
    ) -> Result<String> {
        if days_of_month.is_empty() || days_of_month.iter().any(|&d| d < 1 || d > 31) {
            return Err(Error::validation(
                "days_of_month",
                "must list days between 1 and 31",
            ));
        }
        self.create(
            name,
            Pattern::Monthly { days_of_month, hour, minute },
            topic_template,
            timezone,
            start_date,
            end_date,
            defaults,
            missed_policy,
        )
        .await
    }

    pub async fn create_interval(
        &self,
        name: String,
        seconds: u64,
        topic_template: String,
        timezone: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        defaults: ScheduleDefaults,
        missed_policy: MissedPolicy,
    ) -> Result<String> {
        if seconds == 0 {
            return Err(Error::validation("seconds", "must be greater than 0"));
        }
        self.create(
            name,
            Pattern::Interval { seconds },
            topic_template,
            timezone,
            start_date,
            end_date,
            defaults,
            missed_policy,
        )
        .await
    }

    pub async fn create_cron(
        &self,
        name: String,
        expression: String,
        topic_template: String,
        timezone: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        defaults: ScheduleDefaults,
        missed_policy: MissedPolicy,
    ) -> Result<String> {
        validate_cron(&expression).map_err(|msg| Error::validation("expression", msg))?;
        self.create(
            name,
            Pattern::Cron { expression },
            topic_template,
            timezone,
            start_date,
            end_date,
            defaults,
            missed_policy,
        )
        .await
    }

    async fn create(
        &self,
        name: String,
        pattern: Pattern,
        topic_template: String,
        timezone: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        defaults: ScheduleDefaults,
        missed_policy: MissedPolicy,
    ) -> Result<String> {
        if name.trim().is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        if topic_template.trim().is_empty() {
            return Err(Error::validation("topic_template", "must not be empty"));
        }
        validate_timezone(&timezone).map_err(|msg| Error::validation("timezone", msg))?;
        if let Some(end) = end_date {
            if end < start_date {
                return Err(Error::validation("end_date", "must not precede start_date"));
            }
        }

        let now = Utc::now();
        let tz = parse_tz(&timezone);
        let anchor = start_date
            .and_hms_opt(0, 0, 0)
            .map(|n| Utc.from_utc_datetime(&n))
            .unwrap_or(now);
        let after = anchor.max(now) - ChronoDuration::seconds(1);
        let next_fire_at = next_fire_after(&pattern, start_date, after, tz);

        let schedule = RecurringSchedule {
            id: format!("sched_{}", uuid::Uuid::new_v4().simple()),
            name,
            pattern,
            topic_template,
            timezone,
            enabled: true,
            start_date,
            end_date,
            defaults,
            missed_policy,
            last_fired_at: None,
            next_fire_at,
            last_job_id: None,
            consecutive_failures: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let id = schedule.id.clone();
        self.store.upsert_schedule(schedule).await?;
        Ok(id)
    }

    pub async fn list(&self) -> Vec<RecurringSchedule> {
        self.store.list_schedules().await
    }

    pub async fn get(&self, id: &str) -> Option<RecurringSchedule> {
        self.store.get_schedule(id).await
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        let mut schedule = self
            .store
            .get_schedule(id)
            .await
            .ok_or_else(|| Error::not_found("schedule", id))?;
        schedule.enabled = false;
        schedule.updated_at = Utc::now();
        self.store.upsert_schedule(schedule).await
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        let mut schedule = self
            .store
            .get_schedule(id)
            .await
            .ok_or_else(|| Error::not_found("schedule", id))?;
        schedule.enabled = true;
        schedule.updated_at = Utc::now();
        self.store.upsert_schedule(schedule).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.store.get_schedule(id).await.is_none() {
            return Err(Error::not_found("schedule", id));
        }
        self.store.delete_schedule(id).await
    }

    /// Materialise every schedule whose `next_fire_at` has arrived. Due
    /// schedules are processed concurrently — each materialisation only
    /// touches the store and calendar, not the pipeline, so there is no need
    /// to bound concurrency beyond what is naturally due in one tick.
    pub async fn tick_once(&self) -> usize {
        let now = Utc::now();
        let due: Vec<RecurringSchedule> = self
            .store
            .list_schedules()
            .await
            .into_iter()
            .filter(|s| s.enabled && !s.is_expired(now) && s.next_fire_at.is_some_and(|t| t <= now))
            .collect();

        let mut fired = 0;
        for schedule in due {
            self.fire_one(schedule, now).await;
            fired += 1;
        }
        fired
    }

    async fn fire_one(&self, mut schedule: RecurringSchedule, now: DateTime<Utc>) {
        let tz = parse_tz(&schedule.timezone);
        let mut fire_times = Vec::new();
        let mut cursor = schedule.next_fire_at.unwrap_or(now);

        match schedule.missed_policy {
            MissedPolicy::CatchUp => {
                let mut count = 0;
                while cursor <= now && count < MAX_CATCHUP_PER_TICK {
                    fire_times.push(cursor);
                    count += 1;
                    match next_fire_after(&schedule.pattern, schedule.start_date, cursor, tz) {
                        Some(next) => cursor = next,
                        None => break,
                    }
                }
            }
            MissedPolicy::Skip | MissedPolicy::RunOnce => {
                if cursor <= now {
                    fire_times.push(cursor);
                }
                // Jump straight to the first occurrence after *now*, not
                // after `cursor` — any backlog beyond the one fire above is
                // dropped, never queued for a later tick.
                cursor = now;
            }
        }

        for fire_time in &fire_times {
            let req = ScheduleRequest {
                topic: schedule.render_topic(*fire_time),
                style: schedule.defaults.style.clone(),
                duration_seconds: schedule.defaults.duration_seconds,
                tags: schedule.defaults.tags.clone(),
                category: schedule.defaults.category.clone(),
                privacy: schedule.defaults.privacy,
                scheduled_at: (*fire_time).max(now),
                publish_at: None,
                priority: None,
                max_attempts: None,
                retry_policy: None,
                source_schedule_id: Some(schedule.id.clone()),
            };
            match self.scheduler.schedule(req).await {
                Ok(job_id) => {
                    schedule.last_job_id = Some(job_id);
                    schedule.consecutive_failures = 0;
                    schedule.last_error = None;
                }
                Err(e) => {
                    schedule.consecutive_failures += 1;
                    schedule.last_error = Some(e.to_string());
                }
            }
            schedule.last_fired_at = Some(*fire_time);
        }

        schedule.next_fire_at = next_fire_after(&schedule.pattern, schedule.start_date, cursor, tz);
        schedule.updated_at = Utc::now();
        let _ = self.store.upsert_schedule(schedule).await;
    }
}

/// Compute the first occurrence of `pattern` strictly after `after`,
/// evaluated in `tz`. `start_date` anchors `Interval` patterns.
fn next_fire_after(
    pattern: &Pattern,
    start_date: NaiveDate,
    after: DateTime<Utc>,
    tz: chrono_tz::Tz,
) -> Option<DateTime<Utc>> {
    match pattern {
        Pattern::Daily { hour, minute } => next_weekly_like(&[], *hour, *minute, after, tz, true),
        Pattern::Weekly { weekdays, hour, minute } => {
            next_weekly_like(weekdays, *hour, *minute, after, tz, false)
        }
        Pattern::Monthly { days_of_month, hour, minute } => {
            next_monthly(days_of_month, *hour, *minute, after, tz)
        }
        Pattern::Interval { seconds } => next_interval(*seconds, start_date, after),
        Pattern::Cron { expression } => cron_next_tz(expression, &after, tz),
    }
}

fn local_to_utc(tz: chrono_tz::Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        chrono::LocalResult::None => None,
    }
}

/// Shared engine for `Daily` (empty `weekdays`, `any_day = true`) and
/// `Weekly`. Searches day by day, bounded to just over a year so an
/// impossible weekday set cannot spin forever.
fn next_weekly_like(
    weekdays: &[Weekday],
    hour: u32,
    minute: u32,
    after: DateTime<Utc>,
    tz: chrono_tz::Tz,
    any_day: bool,
) -> Option<DateTime<Utc>> {
    let local_after = after.with_timezone(&tz).naive_local();
    let mut date = local_after.date();

    for _ in 0..370 {
        let matches_day = any_day || weekdays.contains(&date.weekday());
        if matches_day {
            if let Some(naive) = date.and_hms_opt(hour, minute, 0) {
                if naive > local_after {
                    if let Some(utc) = local_to_utc(tz, naive) {
                        return Some(utc);
                    }
                }
            }
        }
        date = date.succ_opt()?;
    }
    None
}

fn next_monthly(days_of_month: &[u32], hour: u32, minute: u32, after: DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
    let local_after = after.with_timezone(&tz).naive_local();
    let mut sorted_days = days_of_month.to_vec();
    sorted_days.sort_unstable();

    let mut year = local_after.year();
    let mut month = local_after.month();

    for _ in 0..MONTHLY_SEARCH_MONTHS {
        for &day in &sorted_days {
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                continue;
            };
            if naive > local_after {
                if let Some(utc) = local_to_utc(tz, naive) {
                    return Some(utc);
                }
            }
        }
        if month == 12 {
            month = 1;
            year += 1;
        } else {
            month += 1;
        }
    }
    None
}

fn next_interval(seconds: u64, start_date: NaiveDate, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let anchor = start_date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n))?;
    if seconds == 0 {
        return None;
    }
    let step = ChronoDuration::seconds(seconds as i64);
    if anchor > after {
        return Some(anchor);
    }
    let elapsed = (after - anchor).num_seconds().max(0) as u64;
    let steps_passed = elapsed / seconds;
    let mut next = anchor + step * (steps_passed as i32 + 1);
    // Guard against truncation surprises on very large step counts.
    while next <= after {
        next += step;
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarManager;
    use crate::events::EventBus;
    use crate::executor::JobExecutor;
    use crate::pipeline::Capabilities;
    use crate::runtime::cancel::CancelMap;
    use cps_capabilities::mock::{MockScriptGenerator, MockVideoAssembler, MockYoutubeUploader};
    use cps_domain::config::{CalendarConfig, SchedulerConfig};
    use chrono::TimeZone;

    async fn harness() -> (Arc<RecurringScheduler>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::load(dir.path()).await.unwrap());
        let calendar = Arc::new(CalendarManager::new(CalendarConfig {
            min_gap_hours: 0,
            max_per_day: 50,
            preferred_hours: vec![10],
            blackout_dates: vec![],
        }));
        let executor = Arc::new(JobExecutor::new(2, Arc::new(CancelMap::new())));
        let capabilities = Arc::new(Capabilities {
            scripts: Arc::new(MockScriptGenerator),
            assembler: Arc::new(MockVideoAssembler),
            uploader: Arc::new(MockYoutubeUploader),
        });
        let scheduler = ContentScheduler::new(
            Arc::clone(&store),
            calendar,
            executor,
            EventBus::new(),
            capabilities,
            SchedulerConfig::default(),
        );
        let recurring = RecurringScheduler::new(Arc::clone(&store), scheduler);
        (recurring, dir)
    }

    #[test]
    fn next_daily_finds_tomorrow_when_today_already_passed() {
        let after = Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap();
        let next = next_fire_after(
            &Pattern::Daily { hour: 10, minute: 0 },
            NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            after,
            chrono_tz::UTC,
        )
        .unwrap();
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2030, 1, 2).unwrap());
        assert_eq!(next.hour(), 10);
    }

    #[test]
    fn next_weekly_only_lands_on_named_weekdays() {
        let after = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(); // a Tuesday
        let next = next_fire_after(
            &Pattern::Weekly {
                weekdays: vec![Weekday::Fri],
                hour: 9,
                minute: 0,
            },
            NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            after,
            chrono_tz::UTC,
        )
        .unwrap();
        assert_eq!(next.weekday(), Weekday::Fri);
    }

    #[test]
    fn next_monthly_skips_months_without_the_named_day() {
        let after = Utc.with_ymd_and_hms(2030, 1, 31, 12, 0, 0).unwrap();
        let next = next_fire_after(
            &Pattern::Monthly { days_of_month: vec![31], hour: 9, minute: 0 },
            NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            after,
            chrono_tz::UTC,
        )
        .unwrap();
        // February 2030 has no 31st; March does.
        assert_eq!(next.month(), 3);
        assert_eq!(next.day(), 31);
    }

    #[test]
    fn next_interval_advances_by_exact_multiples_of_the_step() {
        let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let after = Utc.with_ymd_and_hms(2030, 1, 1, 0, 30, 0).unwrap();
        let next = next_fire_after(&Pattern::Interval { seconds: 3600 }, start, after, chrono_tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2030, 1, 1, 1, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn create_daily_computes_an_initial_next_fire_at() {
        let (recurring, _dir) = harness().await;
        let id = recurring
            .create_daily(
                "daily".into(),
                10,
                0,
                "update for {date}".into(),
                "UTC".into(),
                Utc::now().date_naive(),
                None,
                ScheduleDefaults::default(),
                MissedPolicy::Skip,
            )
            .await
            .unwrap();
        let schedule = recurring.get(&id).await.unwrap();
        assert!(schedule.next_fire_at.is_some());
    }

    #[tokio::test]
    async fn create_cron_rejects_malformed_expression() {
        let (recurring, _dir) = harness().await;
        let result = recurring
            .create_cron(
                "bad".into(),
                "not a cron".into(),
                "t".into(),
                "UTC".into(),
                Utc::now().date_naive(),
                None,
                ScheduleDefaults::default(),
                MissedPolicy::Skip,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tick_materialises_exactly_one_job_for_a_skip_policy_schedule() {
        let (recurring, _dir) = harness().await;
        let id = recurring
            .create_daily(
                "daily".into(),
                0,
                0,
                "update for {date}".into(),
                "UTC".into(),
                Utc::now().date_naive() - chrono::Duration::days(5),
                None,
                ScheduleDefaults::default(),
                MissedPolicy::Skip,
            )
            .await
            .unwrap();
        // Force next_fire_at far into the past to simulate a long backlog.
        let mut schedule = recurring.get(&id).await.unwrap();
        schedule.next_fire_at = Some(Utc::now() - chrono::Duration::days(5));
        recurring.store.upsert_schedule(schedule).await.unwrap();

        let fired = recurring.tick_once().await;
        assert_eq!(fired, 1);

        let jobs = recurring.scheduler.list(None).await;
        assert_eq!(jobs.len(), 1, "a missed-but-skipped backlog must materialise exactly one job");

        let schedule = recurring.get(&id).await.unwrap();
        assert!(schedule.next_fire_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_enabled_flag() {
        let (recurring, _dir) = harness().await;
        let id = recurring
            .create_daily(
                "d".into(),
                10,
                0,
                "t".into(),
                "UTC".into(),
                Utc::now().date_naive(),
                None,
                ScheduleDefaults::default(),
                MissedPolicy::Skip,
            )
            .await
            .unwrap();
        recurring.pause(&id).await.unwrap();
        assert!(!recurring.get(&id).await.unwrap().enabled);
        recurring.resume(&id).await.unwrap();
        assert!(recurring.get(&id).await.unwrap().enabled);
    }

    #[tokio::test]
    async fn delete_removes_the_schedule() {
        let (recurring, _dir) = harness().await;
        let id = recurring
            .create_daily(
                "d".into(),
                10,
                0,
                "t".into(),
                "UTC".into(),
                Utc::now().date_naive(),
                None,
                ScheduleDefaults::default(),
                MissedPolicy::Skip,
            )
            .await
            .unwrap();
        recurring.delete(&id).await.unwrap();
        assert!(recurring.get(&id).await.is_none());
    }
}
