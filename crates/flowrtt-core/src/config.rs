//! Tracker configuration.
//!
//! Every field is optional in the JSON form and falls back to the default
//! listed on [`TrackerConfig`]. Loaded values are validated before use.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Tuning knobs for the session engine.
///
/// # Examples
/// ```
/// use flowrtt_core::TrackerConfig;
///
/// let config = TrackerConfig::from_json_str(r#"{ "idle_timeout_secs": 30 }"#).unwrap();
/// assert_eq!(config.idle_timeout_secs, 30);
/// assert_eq!(config.queue_capacity, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Per-session queue bound; producers block when it is full.
    pub queue_capacity: usize,
    /// Sessions idle for longer than this are closed.
    pub idle_timeout_secs: u64,
    /// How often each session worker checks for idleness.
    pub idle_check_interval_ms: u64,
    /// Maximum age of pending sequence-cache entries; `0` keeps them forever.
    pub rtt_max_age_ms: u64,
    /// Payload-bearing segments inspected before giving up on classification.
    pub max_inspected_segments: u32,
    /// Slots allocated on the first pool growth; later growths double.
    pub initial_pool_capacity: usize,
    /// Period of the per-interface throughput reporter.
    pub throughput_interval_secs: u64,
    /// Threads driving session workers; `0` uses one per CPU.
    pub worker_threads: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            idle_timeout_secs: 120,
            idle_check_interval_ms: 60_000,
            rtt_max_age_ms: 300_000,
            max_inspected_segments: 5,
            initial_pool_capacity: 8192,
            throughput_interval_secs: 10,
            worker_threads: 0,
        }
    }
}

impl TrackerConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = |field: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero",
                })
            } else {
                Ok(())
            }
        };
        non_zero("queue_capacity", self.queue_capacity as u64)?;
        non_zero("idle_timeout_secs", self.idle_timeout_secs)?;
        non_zero("idle_check_interval_ms", self.idle_check_interval_ms)?;
        non_zero("initial_pool_capacity", self.initial_pool_capacity as u64)?;
        non_zero("throughput_interval_secs", self.throughput_interval_secs)?;
        if i64::try_from(self.idle_timeout_secs).is_err() {
            return Err(ConfigError::Invalid {
                field: "idle_timeout_secs",
                reason: "out of range",
            });
        }
        if i64::try_from(self.rtt_max_age_ms).is_err() {
            return Err(ConfigError::Invalid {
                field: "rtt_max_age_ms",
                reason: "out of range",
            });
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> time::Duration {
        time::Duration::seconds(self.idle_timeout_secs.min(i64::MAX as u64) as i64)
    }

    /// Never zero, even for an unvalidated config.
    pub fn idle_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_check_interval_ms.max(1))
    }

    pub fn rtt_max_age(&self) -> Option<time::Duration> {
        (self.rtt_max_age_ms > 0)
            .then(|| time::Duration::milliseconds(self.rtt_max_age_ms.min(i64::MAX as u64) as i64))
    }

    pub fn throughput_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.throughput_interval_secs)
    }
}
