use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use scamsense_engine::{Outcome, Step};

/// Decision returned by a [`PlayerPolicy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub option_id: String,
    pub rationale: Option<String>,
}

impl PolicyDecision {
    #[must_use]
    pub fn new(option_id: impl Into<String>, rationale: Option<String>) -> Self {
        Self {
            option_id: option_id.into(),
            rationale,
        }
    }
}

/// Policy interface for automated play.
pub trait PlayerPolicy {
    /// Name used for logging/debug output.
    fn name(&self) -> &'static str;

    /// Select an option at a choice step. `None` when the step offers none.
    fn pick_option(&mut self, step: &Step) -> Option<PolicyDecision>;
}

/// Built-in automated players.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlayStrategy {
    /// Always the safest option on offer.
    Cautious,
    /// Always the most dangerous option on offer.
    Reckless,
    /// Uniformly random, seeded.
    Random,
}

impl PlayStrategy {
    pub const ALL: [Self; 3] = [Self::Cautious, Self::Reckless, Self::Random];

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cautious" | "safe" => Some(Self::Cautious),
            "reckless" | "dangerous" => Some(Self::Reckless),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cautious => "cautious",
            Self::Reckless => "reckless",
            Self::Random => "random",
        }
    }

    #[must_use]
    pub fn create_policy(self, seed: u64) -> Box<dyn PlayerPolicy + Send> {
        match self {
            Self::Cautious => Box::new(CautiousPolicy),
            Self::Reckless => Box::new(RecklessPolicy),
            Self::Random => Box::new(RandomPolicy::new(seed)),
        }
    }
}

impl fmt::Display for PlayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const fn risk(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Safe => 0,
        Outcome::Risky => 1,
        Outcome::Dangerous => 2,
    }
}

struct CautiousPolicy;
struct RecklessPolicy;

struct RandomPolicy {
    rng: ChaCha20Rng,
}

impl RandomPolicy {
    fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }
}

impl PlayerPolicy for CautiousPolicy {
    fn name(&self) -> &'static str {
        "cautious"
    }

    fn pick_option(&mut self, step: &Step) -> Option<PolicyDecision> {
        // min_by_key keeps the first of equally safe options.
        step.options
            .iter()
            .min_by_key(|choice| risk(choice.outcome))
            .map(|choice| PolicyDecision::new(&choice.id, Some(format!("{} option", choice.outcome))))
    }
}

impl PlayerPolicy for RecklessPolicy {
    fn name(&self) -> &'static str {
        "reckless"
    }

    fn pick_option(&mut self, step: &Step) -> Option<PolicyDecision> {
        step.options
            .iter()
            .rev()
            .max_by_key(|choice| risk(choice.outcome))
            .map(|choice| PolicyDecision::new(&choice.id, Some(format!("{} option", choice.outcome))))
    }
}

impl PlayerPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn pick_option(&mut self, step: &Step) -> Option<PolicyDecision> {
        if step.options.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..step.options.len());
        let choice = &step.options[index];
        Some(PolicyDecision::new(&choice.id, Some(format!("rolled {index}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scamsense_engine::normalize;
    use serde_json::json;

    fn step() -> Step {
        let scenario = normalize(&json!({ "steps": [ { "text": "?", "options": [
            { "id": "d1", "label": "a", "outcome": "dangerous" },
            { "id": "s1", "label": "b", "outcome": "safe" },
            { "id": "r1", "label": "c", "outcome": "risky" },
            { "id": "d2", "label": "d", "outcome": "dangerous" },
        ] } ] }))
        .unwrap();
        scenario.steps[0].clone()
    }

    #[test]
    fn cautious_and_reckless_pick_extremes() {
        let step = step();
        let safe = PlayStrategy::Cautious.create_policy(0).pick_option(&step).unwrap();
        assert_eq!(safe.option_id, "s1");
        let reckless = PlayStrategy::Reckless.create_policy(0).pick_option(&step).unwrap();
        assert_eq!(reckless.option_id, "d1");
    }

    #[test]
    fn random_policy_is_reproducible_per_seed() {
        let step = step();
        let picks = |seed| {
            let mut policy = PlayStrategy::Random.create_policy(seed);
            (0..16)
                .map(|_| policy.pick_option(&step).unwrap().option_id)
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(42), picks(42));
        assert!(picks(42).iter().all(|id| step.option(id).is_some()));
    }

    #[test]
    fn strategies_parse_from_labels() {
        for strategy in PlayStrategy::ALL {
            assert_eq!(PlayStrategy::parse(strategy.label()), Some(strategy));
        }
        assert_eq!(PlayStrategy::parse("Safe"), Some(PlayStrategy::Cautious));
        assert_eq!(PlayStrategy::parse("monte-carlo"), None);
    }
}
