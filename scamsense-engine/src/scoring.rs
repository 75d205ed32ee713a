//! Pure scoring of play traces.
//!
//! Scoring is a fold over the trace: each safe choice earns base points plus
//! a streak bonus, risky choices earn `risky_points`, dangerous choices cost
//! `dangerous_penalty`. With `risky_points < safe_points` an all-safe trace
//! always outranks any equal-length trace containing a dangerous choice.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;
use crate::model::Outcome;
use crate::trace::{Trace, TraceEntry};

/// Final classification of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Safe,
    Compromised,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Compromised => write!(f, "compromised"),
        }
    }
}

/// Classification statistics for a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub safe: usize,
    pub risky: usize,
    pub dangerous: usize,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Safe => self.safe += 1,
            Outcome::Risky => self.risky += 1,
            Outcome::Dangerous => self.dangerous += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.safe + self.risky + self.dangerous
    }

    #[must_use]
    pub const fn mistakes(&self) -> usize {
        self.risky + self.dangerous
    }
}

/// Reward curve. Every field falls back to the shipped default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    pub safe_points: u32,
    /// Bonus per consecutive safe choice beyond the first.
    pub streak_bonus: u32,
    /// Upper bound on the bonus for a single choice.
    pub streak_bonus_cap: u32,
    pub risky_points: u32,
    pub dangerous_penalty: u32,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            safe_points: 100,
            streak_bonus: 20,
            streak_bonus_cap: 100,
            risky_points: 0,
            dangerous_penalty: 50,
        }
    }
}

impl ScoreConfig {
    /// Check the curve keeps safe play strictly ahead.
    ///
    /// # Errors
    ///
    /// Returns an error when safe choices would not outscore risky ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.safe_points == 0 {
            return Err(ConfigError::Invalid {
                field: "score.safe_points",
                reason: "must be positive".to_string(),
            });
        }
        if self.risky_points >= self.safe_points {
            return Err(ConfigError::Invalid {
                field: "score.risky_points",
                reason: format!("must be below safe_points ({})", self.safe_points),
            });
        }
        Ok(())
    }

    fn bonus_for(&self, streak: usize) -> i64 {
        let extra = u32::try_from(streak.saturating_sub(1)).unwrap_or(u32::MAX);
        i64::from(extra.saturating_mul(self.streak_bonus).min(self.streak_bonus_cap))
    }
}

/// Derived result of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCard {
    pub score: u32,
    pub mistakes: usize,
    pub verdict: Verdict,
    /// Safe choices at the end of the trace.
    pub streak: usize,
    pub best_streak: usize,
    pub tally: OutcomeTally,
}

/// Score a trace with the default curve.
#[must_use]
pub fn score(trace: &Trace) -> ScoreCard {
    score_entries(trace.entries(), &ScoreConfig::default())
}

/// Score a trace with a custom curve.
#[must_use]
pub fn score_with(trace: &Trace, cfg: &ScoreConfig) -> ScoreCard {
    score_entries(trace.entries(), cfg)
}

/// Score raw entries.
///
/// Every choice recorded in a trace lies on the branch that carried the
/// session to its ending, so a single dangerous choice compromises it.
#[must_use]
pub fn score_entries(entries: &[TraceEntry], cfg: &ScoreConfig) -> ScoreCard {
    let mut tally = OutcomeTally::default();
    let mut streak = 0_usize;
    let mut best_streak = 0_usize;
    let mut points = 0_i64;

    for entry in entries {
        tally.record(entry.outcome);
        match entry.outcome {
            Outcome::Safe => {
                streak += 1;
                best_streak = best_streak.max(streak);
                points += i64::from(cfg.safe_points) + cfg.bonus_for(streak);
            }
            Outcome::Risky => {
                streak = 0;
                points += i64::from(cfg.risky_points);
            }
            Outcome::Dangerous => {
                streak = 0;
                points -= i64::from(cfg.dangerous_penalty);
            }
        }
    }

    let verdict = if tally.dangerous > 0 {
        Verdict::Compromised
    } else {
        Verdict::Safe
    };

    ScoreCard {
        score: u32::try_from(points.max(0)).unwrap_or(u32::MAX),
        mistakes: tally.mistakes(),
        verdict,
        streak,
        best_streak,
        tally,
    }
}
