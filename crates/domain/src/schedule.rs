//! `RecurringSchedule`: a pattern that periodically materialises concrete jobs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::job::Privacy;

/// How a schedule fires. Cron uses a standard 5-field minute/hour/dom/month/dow
/// grammar evaluated in the schedule's timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    Daily { hour: u32, minute: u32 },
    Weekly { weekdays: Vec<chrono::Weekday>, hour: u32, minute: u32 },
    Monthly { days_of_month: Vec<u32>, hour: u32, minute: u32 },
    Interval { seconds: u64 },
    Cron { expression: String },
}

/// Whether a schedule that missed its fire window (process was asleep) should
/// catch up. The scheduler's chosen default is `Skip` — see the core's "no
/// backfill" design note; `RunOnce`/`CatchUp` exist for schedules that opt in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedPolicy {
    Skip,
    RunOnce,
    CatchUp,
}

impl Default for MissedPolicy {
    fn default() -> Self {
        MissedPolicy::Skip
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStatus {
    Active,
    Paused,
    Error,
}

/// Default production parameters applied to every job this schedule creates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleDefaults {
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default = "default_duration")]
    pub duration_seconds: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub privacy: Option<Privacy>,
}

fn default_duration() -> u32 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringSchedule {
    pub id: String,
    pub name: String,
    pub pattern: Pattern,
    /// Template for `Job::topic`; tokens like `{date}`, `{week}`, `{timestamp}`
    /// are substituted at materialisation time.
    pub topic_template: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub defaults: ScheduleDefaults,
    #[serde(default)]
    pub missed_policy: MissedPolicy,

    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_fire_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_job_id: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_true() -> bool {
    true
}

impl RecurringSchedule {
    /// Status is derived, never stored directly: `enabled` plus a streak of
    /// consecutive materialisation failures decide it.
    pub fn computed_status(&self) -> ScheduleStatus {
        if !self.enabled {
            ScheduleStatus::Paused
        } else if self.consecutive_failures >= 3 {
            ScheduleStatus::Error
        } else {
            ScheduleStatus::Active
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.end_date {
            Some(end) => now.date_naive() > end,
            None => false,
        }
    }

    /// Substitute `{date}`, `{time}`, `{weekday}`, `{week}`, `{timestamp}`,
    /// `{year}`, `{month}`, `{day}` in `topic_template` against `fire_time`,
    /// rendered in this schedule's configured timezone.
    pub fn render_topic(&self, fire_time: DateTime<Utc>) -> String {
        let tz: chrono_tz::Tz = self.timezone.parse().unwrap_or(chrono_tz::UTC);
        let local = fire_time.with_timezone(&tz);
        self.topic_template
            .replace("{date}", &local.format("%Y-%m-%d").to_string())
            .replace("{time}", &local.format("%H:%M").to_string())
            .replace("{weekday}", &local.format("%A").to_string())
            .replace("{week}", &local.format("%V").to_string())
            .replace("{timestamp}", &fire_time.timestamp().to_string())
            .replace("{year}", &local.format("%Y").to_string())
            .replace("{month}", &local.format("%m").to_string())
            .replace("{day}", &local.format("%d").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(enabled: bool, failures: u32) -> RecurringSchedule {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        RecurringSchedule {
            id: "sched_1".into(),
            name: "n".into(),
            pattern: Pattern::Daily { hour: 10, minute: 0 },
            topic_template: "{date}".into(),
            timezone: "UTC".into(),
            enabled,
            start_date: now.date_naive(),
            end_date: None,
            defaults: ScheduleDefaults::default(),
            missed_policy: MissedPolicy::Skip,
            last_fired_at: None,
            next_fire_at: None,
            last_job_id: None,
            consecutive_failures: failures,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn disabled_schedule_is_paused_regardless_of_failures() {
        assert_eq!(sample(false, 0).computed_status(), ScheduleStatus::Paused);
    }

    #[test]
    fn repeated_failures_flip_to_error() {
        assert_eq!(sample(true, 3).computed_status(), ScheduleStatus::Error);
        assert_eq!(sample(true, 2).computed_status(), ScheduleStatus::Active);
    }

    #[test]
    fn end_date_expiry() {
        let mut s = sample(true, 0);
        s.end_date = Some(NaiveDate::from_ymd_opt(2029, 12, 31).unwrap());
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert!(s.is_expired(now));
    }

    #[test]
    fn render_topic_substitutes_tokens() {
        let mut s = sample(true, 0);
        s.topic_template = "update for {date} at {time} ({weekday})".into();
        let fire_time = Utc.with_ymd_and_hms(2030, 1, 7, 10, 0, 0).unwrap();
        let rendered = s.render_topic(fire_time);
        assert_eq!(rendered, "update for 2030-01-07 at 10:00 (Monday)");
    }

    #[test]
    fn render_topic_uses_schedule_timezone() {
        let mut s = sample(true, 0);
        s.timezone = "America/New_York".into();
        s.topic_template = "{date} {time}".into();
        // 2030-01-07T03:00:00Z is 2030-01-06T22:00:00-05:00 in New York.
        let fire_time = Utc.with_ymd_and_hms(2030, 1, 7, 3, 0, 0).unwrap();
        assert_eq!(s.render_topic(fire_time), "2030-01-06 22:00");
    }
}
