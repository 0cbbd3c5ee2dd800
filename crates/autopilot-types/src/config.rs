//! Engine configuration types.
//!
//! `EngineConfig` represents `config.toml` in the data directory. Every field
//! has a default, so an empty or missing file yields a working engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrently running workflows per org.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Retries after the first attempt for retryable failure classes.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before retry n is `backoff_secs[n - 1]` (last value repeats).
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,

    /// Upper bound on a single tool invocation.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Runs left `running` longer than this are treated as crashed.
    #[serde(default = "default_stale_run_minutes")]
    pub stale_run_minutes: i64,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    #[serde(default)]
    pub gate: GateConfig,
}

/// Static rules for the pre-flight gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Step names that are always blocked (`PERMISSION_DENIED`).
    #[serde(default)]
    pub blocked_steps: Vec<String>,
    /// Step names rewritten to the sampling-reduced shape before invocation.
    #[serde(default)]
    pub sampled_steps: Vec<String>,
    /// Orgs not allowed to run side-effecting steps.
    #[serde(default)]
    pub denied_orgs: Vec<String>,
}

fn default_concurrency_limit() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_secs() -> Vec<u64> {
    vec![1, 4, 16]
}

fn default_step_timeout_secs() -> u64 {
    120
}

fn default_stale_run_minutes() -> i64 {
    30
}

fn default_event_bus_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
            step_timeout_secs: default_step_timeout_secs(),
            stale_run_minutes: default_stale_run_minutes(),
            event_bus_capacity: default_event_bus_capacity(),
            gate: GateConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Clamp values that would make the engine unusable.
    pub fn normalized(mut self) -> Self {
        self.concurrency_limit = self.concurrency_limit.max(1);
        self.step_timeout_secs = self.step_timeout_secs.max(1);
        self.stale_run_minutes = self.stale_run_minutes.max(1);
        self.event_bus_capacity = self.event_bus_capacity.max(16);
        if self.backoff_secs.is_empty() {
            self.backoff_secs = default_backoff_secs();
        }
        self
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn backoff_schedule(&self) -> Vec<Duration> {
        self.backoff_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency_limit, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_secs, vec![1, 4, 16]);
        assert_eq!(config.step_timeout(), Duration::from_secs(120));
        assert_eq!(config.stale_run_minutes, 30);
        assert!(config.gate.blocked_steps.is_empty());
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
concurrency_limit = 5
backoff_secs = [2, 8]
step_timeout_secs = 30

[gate]
blocked_steps = ["store_catalog"]
sampled_steps = ["profile_columns"]
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(
            config.backoff_schedule(),
            vec![Duration::from_secs(2), Duration::from_secs(8)]
        );
        assert_eq!(config.gate.blocked_steps, vec!["store_catalog"]);
        assert_eq!(config.gate.sampled_steps, vec!["profile_columns"]);
        assert!(config.gate.denied_orgs.is_empty());
    }

    #[test]
    fn test_normalized_clamps_values() {
        let config = EngineConfig {
            concurrency_limit: 0,
            step_timeout_secs: 0,
            backoff_secs: vec![],
            ..EngineConfig::default()
        }
        .normalized();

        assert_eq!(config.concurrency_limit, 1);
        assert_eq!(config.step_timeout_secs, 1);
        assert_eq!(config.backoff_secs, vec![1, 4, 16]);
    }
}
