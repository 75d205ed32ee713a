//! Automated drills: play scenarios with scripted policies and check the
//! engine's guarantees on every run.
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use scamsense_engine::scoring::score_entries;
use scamsense_engine::{
    FixedClock, Outcome, PlaySession, Scenario, ScoreConfig, TraceEntry, Verdict, score_with,
};

use crate::play::{PolicyPlayer, play_out};
use crate::policy::{PlayStrategy, PlayerPolicy};

/// Trace timestamps in drills start here so reruns serialize identically.
const DRILL_EPOCH_SECS: i64 = 1_767_225_600;

pub fn drill_clock() -> Result<FixedClock> {
    let start = DateTime::<Utc>::from_timestamp(DRILL_EPOCH_SECS, 0)
        .context("drill epoch out of range")?;
    Ok(FixedClock::new(start))
}

/// Play a scenario to its end with one policy.
pub fn play_with_policy(
    scenario: Arc<Scenario>,
    policy: &mut dyn PlayerPolicy,
    clock: FixedClock,
) -> Result<PlaySession<FixedClock>> {
    let name = policy.name();
    let mut session = PlaySession::with_clock(scenario, clock);
    let first = session.start()?;
    play_out(&mut session, first, &mut PolicyPlayer::new(policy))?;
    if !session.is_finished() {
        bail!("policy {name} stopped before the scenario ended");
    }
    Ok(session)
}

/// Outcome of one (scenario, policy, seed) drill.
#[derive(Debug, Clone, Serialize)]
pub struct DrillResult {
    pub scenario_id: String,
    pub policy: String,
    pub seed: u64,
    pub choices: Vec<String>,
    pub score: u32,
    pub mistakes: usize,
    pub verdict: Verdict,
    pub end_reason: Option<String>,
    pub deterministic: bool,
    pub failures: Vec<String>,
    pub passed: bool,
}

/// Runs drills with a fixed scoring curve.
pub struct DrillRunner {
    score: ScoreConfig,
}

impl DrillRunner {
    pub const fn new(score: ScoreConfig) -> Self {
        Self { score }
    }

    /// Play `scenario` twice with the same policy and seed and check the run.
    pub fn run(&self, scenario: &Arc<Scenario>, strategy: PlayStrategy, seed: u64) -> DrillResult {
        let mut result = DrillResult {
            scenario_id: scenario.id.clone(),
            policy: strategy.label().to_string(),
            seed,
            choices: Vec::new(),
            score: 0,
            mistakes: 0,
            verdict: Verdict::Safe,
            end_reason: None,
            deterministic: false,
            failures: Vec::new(),
            passed: false,
        };

        let first = match self.play_once(scenario, strategy, seed) {
            Ok(session) => session,
            Err(err) => {
                result.failures.push(format!("{err:#}"));
                return result;
            }
        };
        let card = score_with(first.trace(), &self.score);
        result.choices = first.trace().choice_path();
        result.score = card.score;
        result.mistakes = card.mistakes;
        result.verdict = card.verdict;
        result.end_reason = first.end_reason().map(ToString::to_string);

        match self.play_once(scenario, strategy, seed) {
            Ok(second) => {
                result.deterministic = same_bytes(&first, &second);
                if !result.deterministic {
                    result.failures.push("replay produced a different trace".to_string());
                }
            }
            Err(err) => result.failures.push(format!("replay failed: {err:#}")),
        }

        let has_dangerous = first
            .trace()
            .outcomes()
            .any(|outcome| outcome == Outcome::Dangerous);
        if has_dangerous != (card.verdict == Verdict::Compromised) {
            result
                .failures
                .push(format!("verdict {} disagrees with the trace", card.verdict));
        }
        if has_dangerous {
            let all_safe = self.all_safe_score(first.trace().entries());
            if card.score >= all_safe {
                result.failures.push(format!(
                    "score {} not below the all-safe score {all_safe}",
                    card.score
                ));
            }
        }

        result.passed = result.failures.is_empty();
        result
    }

    fn play_once(
        &self,
        scenario: &Arc<Scenario>,
        strategy: PlayStrategy,
        seed: u64,
    ) -> Result<PlaySession<FixedClock>> {
        let mut policy = strategy.create_policy(seed);
        play_with_policy(Arc::clone(scenario), policy.as_mut(), drill_clock()?)
    }

    /// Score of an equally long trace in which every choice was safe.
    fn all_safe_score(&self, entries: &[TraceEntry]) -> u32 {
        let safe: Vec<TraceEntry> = entries
            .iter()
            .cloned()
            .map(|mut entry| {
                entry.outcome = Outcome::Safe;
                entry
            })
            .collect();
        score_entries(&safe, &self.score).score
    }
}

fn same_bytes(first: &PlaySession<FixedClock>, second: &PlaySession<FixedClock>) -> bool {
    match (
        serde_json::to_vec(first.trace()),
        serde_json::to_vec(second.trace()),
    ) {
        (Ok(a), Ok(b)) => a == b && first.end_reason() == second.end_reason(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scamsense_engine::{Catalog, normalize};
    use serde_json::json;

    fn runner() -> DrillRunner {
        DrillRunner::new(ScoreConfig::default())
    }

    #[test]
    fn catalog_drills_pass_for_every_policy() {
        for scenario in Catalog::builtin().iter() {
            for strategy in PlayStrategy::ALL {
                for seed in [1, 1337] {
                    let result = runner().run(scenario, strategy, seed);
                    assert!(result.passed, "{} {strategy}: {:?}", scenario.id, result.failures);
                    assert!(result.deterministic);
                    assert!(!result.choices.is_empty());
                }
            }
        }
    }

    #[test]
    fn cautious_and_reckless_land_on_opposite_verdicts() {
        let scenario = Catalog::builtin().get("sms-parcel-fee").unwrap();
        let cautious = runner().run(&scenario, PlayStrategy::Cautious, 0);
        let reckless = runner().run(&scenario, PlayStrategy::Reckless, 0);
        assert_eq!(cautious.verdict, Verdict::Safe);
        assert_eq!(reckless.verdict, Verdict::Compromised);
        assert!(reckless.score < cautious.score);
    }

    #[test]
    fn cyclic_content_stops_at_the_transition_cap() {
        let scenario = Arc::new(
            normalize(&json!({ "steps": [
                { "id": "a", "kind": "question", "text": "loop", "options": [
                    { "id": "x", "label": "again", "outcome": "safe", "next": "b" },
                    { "id": "y", "label": "again", "outcome": "safe", "next": "b" }
                ] },
                { "id": "b", "kind": "question", "text": "loop", "options": [
                    { "id": "x", "label": "again", "outcome": "safe", "next": "a" },
                    { "id": "y", "label": "again", "outcome": "safe", "next": "a" }
                ] }
            ] }))
            .unwrap(),
        );
        let result = runner().run(&scenario, PlayStrategy::Random, 9);
        assert!(result.passed, "{:?}", result.failures);
        assert!(result.end_reason.unwrap().contains("transition limit"));
    }
}
