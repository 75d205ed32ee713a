//! Tunable engine policy loaded from JSON.
//!
//! Structural limits are not configurable; see [`crate::constants`].
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::scoring::ScoreConfig;

/// Problems loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Bounded exponential backoff for the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt; doubles after each retry.
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 16_000,
            max_attempts: 4,
            attempt_timeout_ms: 45_000,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Delay slept before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let factor = 1_u64
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let millis = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.max_delay_ms))
    }

    /// Worst-case time spent sleeping between attempts.
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|retry| self.delay_before_retry(retry)).sum()
    }

    /// # Errors
    ///
    /// Returns an error when the policy allows no attempts or no time per attempt.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.attempt_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.max_delay_ms",
                reason: format!("must be at least initial_delay_ms ({})", self.initial_delay_ms),
            });
        }
        Ok(())
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub score: ScoreConfig,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    /// Parse and validate a JSON config; missing fields use defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// # Errors
    ///
    /// Returns the first invalid section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.score.validate()?;
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_capped() {
        let policy = RetryPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 350,
            max_attempts: 5,
            attempt_timeout_ms: 1_000,
        };
        assert_eq!(policy.delay_before_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_before_retry(3), Duration::from_millis(350));
        assert_eq!(policy.delay_before_retry(90), Duration::from_millis(350));
        assert_eq!(policy.total_backoff(), Duration::from_millis(100 + 200 + 350 + 350));
    }

    #[test]
    fn empty_json_yields_defaults() {
        let cfg = EngineConfig::from_json("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = EngineConfig::from_json(r#"{ "retry": { "max_attempts": 2 } }"#).unwrap();
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.initial_delay_ms, 1_000);
        assert_eq!(cfg.score, ScoreConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EngineConfig::from_json(r#"{ "retry": { "max_attempts": 0 } }"#).unwrap_err();
        assert!(err.to_string().contains("retry.max_attempts"));
        let err = EngineConfig::from_json(r#"{ "score": { "risky_points": 500 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "score.risky_points", .. }));
        assert!(matches!(
            EngineConfig::from_json("not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
