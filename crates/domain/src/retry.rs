//! Retry policy and backoff schedule shared by the executor and the job model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    None,
    Fixed,
    Linear,
    Exponential,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Exponential
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub strategy: RetryStrategy,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Per-attempt timeout. `None` means no timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_secs() -> u64 {
    60
}
fn default_max_delay_secs() -> u64 {
    3600
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            strategy: RetryStrategy::default(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            timeout_secs: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (1-indexed, counting the attempt *after* the
    /// first). `n == 1` is the delay before the first retry.
    pub fn delay_for_attempt(&self, n: u32) -> std::time::Duration {
        use std::time::Duration;
        if n == 0 {
            return Duration::ZERO;
        }
        let secs = match self.strategy {
            RetryStrategy::None => return Duration::ZERO,
            RetryStrategy::Fixed => self.base_delay_secs,
            RetryStrategy::Linear => self.base_delay_secs.saturating_mul(n as u64),
            RetryStrategy::Exponential => {
                let factor = 1u64.checked_shl(n.saturating_sub(1)).unwrap_or(u64::MAX);
                self.base_delay_secs
                    .saturating_mul(factor)
                    .min(self.max_delay_secs)
            }
        };
        Duration::from_secs(secs.min(self.max_delay_secs))
    }

    pub fn allows_retry(&self, attempt_count: u32) -> bool {
        !matches!(self.strategy, RetryStrategy::None) && attempt_count < self.max_retries
    }
}
