//! Ordered record of the choices made during one play session.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Outcome;
use crate::scoring::ScoreCard;
use crate::session::EndReason;

/// One recorded choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub step_id: String,
    pub option_id: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

/// Choices in the order they were made.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn outcomes(&self) -> impl Iterator<Item = Outcome> + '_ {
        self.entries.iter().map(|entry| entry.outcome)
    }

    /// Option ids in order, suitable for replaying the session.
    #[must_use]
    pub fn choice_path(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.option_id.clone())
            .collect()
    }
}

impl From<Vec<TraceEntry>> for Trace {
    fn from(entries: Vec<TraceEntry>) -> Self {
        Self { entries }
    }
}

/// Persisted outcome of one play session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRecord {
    pub session_id: String,
    pub scenario_id: String,
    pub trace: Trace,
    #[serde(flatten)]
    pub score: ScoreCard,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(option: &str, outcome: Outcome) -> TraceEntry {
        TraceEntry {
            step_id: "s".to_string(),
            option_id: option.to_string(),
            outcome,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn trace_serializes_as_plain_array() {
        let trace = Trace::from(vec![entry("a", Outcome::Safe)]);
        let json = serde_json::to_value(&trace).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["stepId"], "s");
        assert_eq!(json[0]["outcome"], "safe");
        assert_eq!(json[0]["timestamp"], "2026-01-02T03:04:05Z");
    }

    #[test]
    fn choice_path_preserves_order() {
        let trace = Trace::from(vec![
            entry("first", Outcome::Safe),
            entry("second", Outcome::Dangerous),
        ]);
        assert_eq!(trace.choice_path(), ["first", "second"]);
        assert_eq!(trace.outcomes().last(), Some(Outcome::Dangerous));
    }
}
