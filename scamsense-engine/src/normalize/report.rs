use serde::{Deserialize, Serialize};
use std::fmt;

/// Silent repairs applied while normalizing one document.
///
/// None of these are errors; they exist so generator quality can be tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepairReport {
    pub steps_truncated: usize,
    pub options_truncated: usize,
    pub step_ids_synthesized: usize,
    pub option_ids_synthesized: usize,
    pub kinds_coerced: usize,
    pub narrative_fallbacks: usize,
    pub outcomes_coerced: usize,
    pub references_cleared: usize,
    pub entry_repaired: bool,
    #[serde(default)]
    pub scenario_id_repaired: bool,
}

impl RepairReport {
    /// Number of individual repairs.
    #[must_use]
    pub fn total(&self) -> usize {
        self.steps_truncated
            + self.options_truncated
            + self.step_ids_synthesized
            + self.option_ids_synthesized
            + self.kinds_coerced
            + self.narrative_fallbacks
            + self.outcomes_coerced
            + self.references_cleared
            + usize::from(self.entry_repaired)
            + usize::from(self.scenario_id_repaired)
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    /// Repairs that changed the graph's meaning rather than its labels.
    #[must_use]
    pub fn references_or_outcomes_touched(&self) -> bool {
        self.outcomes_coerced > 0 || self.references_cleared > 0 || self.steps_truncated > 0
    }

    /// Fold another report into this one (used for catalog-wide totals).
    pub fn absorb(&mut self, other: &Self) {
        self.steps_truncated += other.steps_truncated;
        self.options_truncated += other.options_truncated;
        self.step_ids_synthesized += other.step_ids_synthesized;
        self.option_ids_synthesized += other.option_ids_synthesized;
        self.kinds_coerced += other.kinds_coerced;
        self.narrative_fallbacks += other.narrative_fallbacks;
        self.outcomes_coerced += other.outcomes_coerced;
        self.references_cleared += other.references_cleared;
        self.entry_repaired |= other.entry_repaired;
        self.scenario_id_repaired |= other.scenario_id_repaired;
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "no repairs");
        }
        let fields = [
            ("steps truncated", self.steps_truncated),
            ("options truncated", self.options_truncated),
            ("step ids synthesized", self.step_ids_synthesized),
            ("option ids synthesized", self.option_ids_synthesized),
            ("kinds coerced", self.kinds_coerced),
            ("narrative fallbacks", self.narrative_fallbacks),
            ("outcomes coerced", self.outcomes_coerced),
            ("references cleared", self.references_cleared),
            ("entry repaired", usize::from(self.entry_repaired)),
            ("scenario id repaired", usize::from(self.scenario_id_repaired)),
        ];
        let parts: Vec<String> = fields
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(label, count)| format!("{label}: {count}"))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}
