//! Engine Configuration

use alerting::{AlertConfig, RetryPolicy};
use dedupe_window::{DedupeConfig, WindowError};
use reading_validator::{MissingValuePolicy, ThresholdError, Thresholds};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Longest delay between two dispatch retries
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Durations travel as whole milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

fn default_baseline_max() -> f64 {
    10.0
}
fn default_emergency_ppm() -> f64 {
    5000.0
}
fn default_window_size() -> usize {
    dedupe_window::DEFAULT_CAPACITY
}
fn default_min_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_tolerance() -> f64 {
    1e-9
}
fn default_cooldown() -> Duration {
    Duration::from_secs(300)
}
fn default_true() -> bool {
    true
}
fn default_dispatch_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff() -> Duration {
    Duration::from_secs(2)
}
fn default_queue_capacity() -> usize {
    256
}
fn default_storage_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_neighbor_limit() -> usize {
    20
}

/// Engine configuration
///
/// `missing_value_policy` has no default and must be configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper edge of the normal band (ppm), inclusive
    #[serde(default = "default_baseline_max")]
    pub baseline_max: f64,
    /// Critical at or above this concentration (ppm)
    #[serde(default = "default_emergency_ppm")]
    pub emergency_ppm: f64,
    #[serde(default = "default_window_size")]
    pub dedupe_window_size: usize,
    #[serde(default = "default_min_interval", with = "duration_ms")]
    pub dedupe_min_interval: Duration,
    #[serde(default = "default_tolerance")]
    pub dedupe_value_tolerance: f64,
    pub missing_value_policy: MissingValuePolicy,
    #[serde(default = "default_cooldown", with = "duration_ms")]
    pub alert_cooldown: Duration,
    #[serde(default)]
    pub alert_on_missing: bool,
    #[serde(default = "default_true")]
    pub emit_resolved: bool,
    #[serde(default = "default_dispatch_timeout", with = "duration_ms")]
    pub dispatch_timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub dispatch_max_retries: u32,
    /// Delay before the first retry; doubles per retry
    #[serde(default = "default_backoff", with = "duration_ms")]
    pub dispatch_backoff: Duration,
    /// Bound on both the dispatch and the storage queue
    #[serde(default = "default_queue_capacity")]
    pub dispatch_queue_capacity: usize,
    /// Bound on storage appends and neighbour lookups
    #[serde(default = "default_storage_timeout", with = "duration_ms")]
    pub storage_timeout: Duration,
    /// Stored readings consulted when remediating a missing value
    #[serde(default = "default_neighbor_limit")]
    pub neighbor_lookup_limit: usize,
}

impl EngineConfig {
    /// Defaults for everything but the missing-value policy
    pub fn new(missing_value_policy: MissingValuePolicy) -> Self {
        Self {
            baseline_max: default_baseline_max(),
            emergency_ppm: default_emergency_ppm(),
            dedupe_window_size: default_window_size(),
            dedupe_min_interval: default_min_interval(),
            dedupe_value_tolerance: default_tolerance(),
            missing_value_policy,
            alert_cooldown: default_cooldown(),
            alert_on_missing: false,
            emit_resolved: true,
            dispatch_timeout: default_dispatch_timeout(),
            dispatch_max_retries: default_max_retries(),
            dispatch_backoff: default_backoff(),
            dispatch_queue_capacity: default_queue_capacity(),
            storage_timeout: default_storage_timeout(),
            neighbor_lookup_limit: default_neighbor_limit(),
        }
    }

    /// Check every setting that can be wrong independently of the others
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds()?;
        if self.dedupe_window_size == 0 {
            return Err(WindowError::ZeroCapacity.into());
        }
        if !self.dedupe_value_tolerance.is_finite() || self.dedupe_value_tolerance < 0.0 {
            return Err(WindowError::InvalidTolerance(self.dedupe_value_tolerance).into());
        }
        if self.dispatch_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "dispatch_timeout",
            });
        }
        if self.storage_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "storage_timeout",
            });
        }
        if self.dispatch_queue_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "dispatch_queue_capacity",
            });
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Result<Thresholds, ThresholdError> {
        Thresholds::new(self.baseline_max, self.emergency_ppm)
    }

    pub fn dedupe(&self) -> DedupeConfig {
        DedupeConfig {
            window_size: self.dedupe_window_size,
            min_interval: self.dedupe_min_interval,
            value_tolerance: self.dedupe_value_tolerance,
        }
    }

    pub fn alerts(&self) -> AlertConfig {
        AlertConfig {
            cooldown: self.alert_cooldown,
            alert_on_missing: self.alert_on_missing,
            emit_resolved: self.emit_resolved,
        }
    }

    pub fn dispatch_retry(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.dispatch_timeout,
            max_retries: self.dispatch_max_retries,
            backoff_base: self.dispatch_backoff,
            backoff_max: BACKOFF_CAP.max(self.dispatch_backoff),
        }
    }

    /// Storage appends share the dispatch backoff but use the storage timeout
    pub fn storage_retry(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.storage_timeout,
            ..self.dispatch_retry()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_is_required() {
        let err = serde_json::from_str::<EngineConfig>("{}").unwrap_err();
        assert!(err.to_string().contains("missing_value_policy"));

        let config: EngineConfig =
            serde_json::from_str(r#"{"missing_value_policy": "drop"}"#).unwrap();
        assert_eq!(config, EngineConfig::new(MissingValuePolicy::Drop));
    }

    #[test]
    fn test_durations_in_milliseconds() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"missing_value_policy": "interpolate", "dedupe_min_interval": 1000, "alert_cooldown": 60000}"#,
        )
        .unwrap();
        assert_eq!(config.dedupe_min_interval, Duration::from_secs(1));
        assert_eq!(config.alert_cooldown, Duration::from_secs(60));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["dispatch_timeout"], 10_000);
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig::new(MissingValuePolicy::Interpolate);
        assert!(config.validate().is_ok());

        config.emergency_ppm = config.baseline_max;
        assert!(matches!(config.validate(), Err(ConfigError::Threshold(_))));

        let mut config = EngineConfig::new(MissingValuePolicy::Interpolate);
        config.dedupe_window_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Window(_))));

        let mut config = EngineConfig::new(MissingValuePolicy::Interpolate);
        config.dispatch_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Zero { .. })));
    }

    #[test]
    fn test_backoff_cap_never_below_base() {
        let mut config = EngineConfig::new(MissingValuePolicy::Interpolate);
        config.dispatch_backoff = Duration::from_secs(45);
        let policy = config.dispatch_retry();
        assert_eq!(policy.backoff(1), Duration::from_secs(45));
        assert_eq!(policy.backoff(3), Duration::from_secs(45));
        assert_eq!(config.storage_retry().timeout, config.storage_timeout);
    }
}
