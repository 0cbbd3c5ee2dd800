//! Retry policy: how many times and how long to wait.

use std::time::Duration;

use autopilot_types::config::EngineConfig;

/// Retry budget and backoff schedule for retryable failure classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Vec<Duration>) -> Self {
        let backoff = if backoff.is_empty() {
            vec![Duration::from_secs(1)]
        } else {
            backoff
        };
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_retries, config.backoff_schedule())
    }

    /// Whether another attempt is allowed after `retries_used` retries.
    pub fn should_retry(&self, retries_used: u32) -> bool {
        retries_used < self.max_retries
    }

    /// Delay before retry number `retry` (1-based). The last entry repeats.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let index = (retry.max(1) as usize - 1).min(self.backoff.len() - 1);
        self.backoff[index]
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    /// Three retries after 1s, 4s and 16s.
    fn default() -> Self {
        Self::new(
            3,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(4),
                Duration::from_secs(16),
            ],
        )
    }
}
