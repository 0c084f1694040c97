//! Configuration for the scheduler core.
//!
//! Loaded from a TOML file (if present) and then overridden field-by-field by
//! environment variables, mirroring the canonical names in the process
//! surface: `API_HOST`, `API_PORT`, `MAX_CONCURRENT_JOBS`,
//! `CHECK_INTERVAL_SECONDS`, `MAX_RETRIES`, `RETRY_BASE_DELAY_SECONDS`,
//! `RETRY_MAX_DELAY_SECONDS`, `CALENDAR_MIN_GAP_HOURS`,
//! `CALENDAR_MAX_PER_DAY`, `JOB_STORE_URL`, `TIMEZONE`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::retry::{RetryPolicy, RetryStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "d_timezone")]
    pub timezone: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            calendar: CalendarConfig::default(),
            store: StoreConfig::default(),
            timezone: d_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Drop a WebSocket connection after this many seconds with no event
    /// published and no client frame received.
    #[serde(default = "d_ws_idle_timeout_seconds")]
    pub ws_idle_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            ws_idle_timeout_seconds: d_ws_idle_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "d_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "d_check_interval_seconds")]
    pub check_interval_seconds: u64,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_retry_base_delay_seconds")]
    pub retry_base_delay_seconds: u64,
    #[serde(default = "d_retry_max_delay_seconds")]
    pub retry_max_delay_seconds: u64,
    /// Grace period after a cancellation/timeout signal before the executor
    /// gives up waiting for the operation to observe it.
    #[serde(default = "d_cancel_grace_seconds")]
    pub cancel_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: d_max_concurrent_jobs(),
            check_interval_seconds: d_check_interval_seconds(),
            max_retries: d_max_retries(),
            retry_base_delay_seconds: d_retry_base_delay_seconds(),
            retry_max_delay_seconds: d_retry_max_delay_seconds(),
            cancel_grace_seconds: d_cancel_grace_seconds(),
        }
    }
}

impl SchedulerConfig {
    pub fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            strategy: RetryStrategy::Exponential,
            base_delay_secs: self.retry_base_delay_seconds,
            max_delay_secs: self.retry_max_delay_seconds,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "d_calendar_min_gap_hours")]
    pub min_gap_hours: u32,
    #[serde(default = "d_calendar_max_per_day")]
    pub max_per_day: u32,
    #[serde(default = "d_preferred_hours")]
    pub preferred_hours: Vec<u32>,
    #[serde(default)]
    pub blackout_dates: Vec<chrono::NaiveDate>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            min_gap_hours: d_calendar_min_gap_hours(),
            max_per_day: d_calendar_max_per_day(),
            preferred_hours: d_preferred_hours(),
            blackout_dates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Opaque to the core; the JobStore adapter interprets it. A bare path is
    /// treated as a directory for the JSON-file adapter.
    #[serde(default = "d_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { url: d_store_url() }
    }
}

fn d_port() -> u16 {
    8000
}
fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_ws_idle_timeout_seconds() -> u64 {
    300
}
fn d_max_concurrent_jobs() -> usize {
    2
}
fn d_check_interval_seconds() -> u64 {
    60
}
fn d_max_retries() -> u32 {
    3
}
fn d_retry_base_delay_seconds() -> u64 {
    60
}
fn d_retry_max_delay_seconds() -> u64 {
    3600
}
fn d_cancel_grace_seconds() -> u64 {
    30
}
fn d_calendar_min_gap_hours() -> u32 {
    6
}
fn d_calendar_max_per_day() -> u32 {
    3
}
fn d_preferred_hours() -> Vec<u32> {
    vec![10, 14, 18]
}
fn d_store_url() -> String {
    "./data".into()
}
fn d_timezone() -> String {
    "UTC".into()
}

// ── Env var overrides ───────────────────────────────────────────────

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = if let Ok(text) = std::fs::read_to_string("config.toml") {
            toml::from_str(&text).map_err(|e| ConfigError {
                severity: ConfigSeverity::Error,
                field: "config.toml".into(),
                message: e.to_string(),
            })?
        } else {
            Config::default()
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        use std::env;

        if let Ok(v) = env::var("API_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("API_PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = env::var("MAX_CONCURRENT_JOBS") {
            if let Ok(n) = v.parse() {
                self.scheduler.max_concurrent_jobs = n;
            }
        }
        if let Ok(v) = env::var("CHECK_INTERVAL_SECONDS") {
            if let Ok(n) = v.parse() {
                self.scheduler.check_interval_seconds = n;
            }
        }
        if let Ok(v) = env::var("MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.scheduler.max_retries = n;
            }
        }
        if let Ok(v) = env::var("RETRY_BASE_DELAY_SECONDS") {
            if let Ok(n) = v.parse() {
                self.scheduler.retry_base_delay_seconds = n;
            }
        }
        if let Ok(v) = env::var("RETRY_MAX_DELAY_SECONDS") {
            if let Ok(n) = v.parse() {
                self.scheduler.retry_max_delay_seconds = n;
            }
        }
        if let Ok(v) = env::var("CALENDAR_MIN_GAP_HOURS") {
            if let Ok(n) = v.parse() {
                self.calendar.min_gap_hours = n;
            }
        }
        if let Ok(v) = env::var("CALENDAR_MAX_PER_DAY") {
            if let Ok(n) = v.parse() {
                self.calendar.max_per_day = n;
            }
        }
        if let Ok(v) = env::var("JOB_STORE_URL") {
            self.store.url = v;
        }
        if let Ok(v) = env::var("TIMEZONE") {
            self.timezone = v;
        }
    }

    /// Validate and return every issue found; callers bail out on any `Error`
    /// severity and merely log `Warning`s.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.scheduler.max_concurrent_jobs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.max_concurrent_jobs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "timezone".into(),
                message: format!("invalid IANA timezone: '{}'", self.timezone),
            });
        }
        if self.calendar.max_per_day == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "calendar.max_per_day".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }
        if self.store.url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "store.url".into(),
                message: "must not be empty".into(),
            });
        }

        errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn zero_port_is_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.field == "server.port" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn bad_timezone_is_error() {
        let mut cfg = Config::default();
        cfg.timezone = "Not/Real".into();
        let issues = cfg.validate();
        assert!(issues.iter().any(|e| e.field == "timezone"));
    }

    #[test]
    fn cors_wildcard_is_warning_only() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        let issue = issues
            .iter()
            .find(|e| e.field == "server.cors.allowed_origins")
            .unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }
}
