//! Canonical scenario graph: steps, options and their safety outcomes.
//!
//! A [`Scenario`] is only ever built by the normalizer (or loaded from a
//! persisted canonical document and re-checked with [`Scenario::verify`]),
//! so traversal code may rely on every invariant listed there.
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::constants::{MAX_OPTIONS, MAX_STEPS, MIN_CHOICE_OPTIONS, TERMINAL_MARKER};

/// Options attached to a single step.
pub type Choices = SmallVec<[Choice; MAX_OPTIONS]>;

/// Role a step plays in the drill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Narration only; usually carries no options.
    Information,
    /// "What would you do?" prompt with 2-4 options.
    Question,
    /// Commit-to-an-action prompt with 2-4 options.
    Decision,
}

impl StepKind {
    /// Parse a wire value, accepting `info` as an alias.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "information" | "info" => Some(Self::Information),
            "question" => Some(Self::Question),
            "decision" => Some(Self::Decision),
            _ => None,
        }
    }

    #[must_use]
    pub const fn expects_choices(self) -> bool {
        matches!(self, Self::Question | Self::Decision)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Information => write!(f, "information"),
            Self::Question => write!(f, "question"),
            Self::Decision => write!(f, "decision"),
        }
    }
}

/// Safety classification of choosing an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Safe,
    Risky,
    Dangerous,
}

impl Outcome {
    /// Parse a wire value. Unknown values return `None`; callers decide the
    /// fallback (the normalizer uses [`Outcome::Dangerous`]).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "safe" => Some(Self::Safe),
            "risky" | "caution" | "warning" => Some(Self::Risky),
            "dangerous" | "unsafe" | "scam" | "scammed" => Some(Self::Dangerous),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_mistake(self) -> bool {
        !matches!(self, Self::Safe)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Risky => write!(f, "risky"),
            Self::Dangerous => write!(f, "dangerous"),
        }
    }
}

/// Returns true for `end`, `end_*`, `end-*` (case-insensitive) and blank text.
#[must_use]
pub fn is_terminal_marker(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered.is_empty()
        || lowered == TERMINAL_MARKER
        || lowered.starts_with("end_")
        || lowered.starts_with("end-")
}

/// Where an edge leads. Serialized as the target step id or `"end"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NextStep {
    Step(String),
    #[default]
    Terminal,
}

impl NextStep {
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Step(id) => Some(id.as_str()),
            Self::Terminal => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }
}

impl From<String> for NextStep {
    fn from(raw: String) -> Self {
        if is_terminal_marker(&raw) {
            Self::Terminal
        } else {
            Self::Step(raw)
        }
    }
}

impl From<NextStep> for String {
    fn from(next: NextStep) -> Self {
        match next {
            NextStep::Step(id) => id,
            NextStep::Terminal => TERMINAL_MARKER.to_string(),
        }
    }
}

/// Medium the narrative is framed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Call,
    Email,
    Chat,
    Web,
    Other,
}

impl Channel {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sms" | "text" | "message" => Self::Sms,
            "call" | "phone" | "voice" => Self::Call,
            "email" | "mail" => Self::Email,
            "chat" | "whatsapp" | "dm" => Self::Chat,
            "web" | "website" | "browser" => Self::Web,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Sms => "sms",
            Self::Call => "call",
            Self::Email => "email",
            Self::Chat => "chat",
            Self::Web => "web",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

/// Display payload of a step. Opaque to traversal and scoring.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Narrative {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default)]
    pub text: String,
}

/// A labeled edge out of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub id: String,
    pub label: String,
    #[serde(rename = "outcomeType")]
    pub outcome: Outcome,
    #[serde(rename = "nextStepId", default)]
    pub next: NextStep,
    /// Explanation shown after the option is picked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// A node in the scenario graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub narrative: Narrative,
    #[serde(default)]
    pub options: Choices,
    /// Default continuation for steps without options. `Terminal` means the
    /// step ends the scenario.
    #[serde(default)]
    pub continuation: NextStep,
}

impl Step {
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&Choice> {
        self.options.iter().find(|choice| choice.id == option_id)
    }

    /// True when the step has no options and no continuation.
    #[must_use]
    pub fn is_dead_end(&self) -> bool {
        self.options.is_empty() && self.continuation.is_terminal()
    }
}

/// A validated branching drill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub title: String,
    /// Locale code to localized title.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub title_variants: BTreeMap<String, String>,
    pub entry_step_id: String,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_summary: Option<String>,
}

/// Broken invariant found when re-checking a canonical document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("scenario must have between 1 and {max} steps (got {count})", max = MAX_STEPS)]
    StepCount { count: usize },
    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),
    #[error("step id '{0}' collides with the terminal marker")]
    ReservedStepId(String),
    #[error("entry step '{0}' does not exist")]
    MissingEntry(String),
    #[error("step '{step}' has {count} options (max {max})", max = MAX_OPTIONS)]
    TooManyOptions { step: String, count: usize },
    #[error("step '{step}' repeats option id '{option}'")]
    DuplicateOptionId { step: String, option: String },
    #[error("step '{step}' is a {kind} with {count} options")]
    KindOptionMismatch {
        step: String,
        kind: StepKind,
        count: usize,
    },
    #[error("step '{step}' points at unknown step '{target}'")]
    DanglingReference { step: String, target: String },
}

impl Scenario {
    #[must_use]
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    #[must_use]
    pub fn entry_step(&self) -> Option<&Step> {
        self.step(&self.entry_step_id)
    }

    /// Localized title, falling back to the default title.
    #[must_use]
    pub fn title_for(&self, locale: &str) -> &str {
        self.title_variants
            .get(locale)
            .map_or(self.title.as_str(), String::as_str)
    }

    /// Total number of options across all steps.
    #[must_use]
    pub fn option_count(&self) -> usize {
        self.steps.iter().map(|step| step.options.len()).sum()
    }

    /// Re-check every structural invariant.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let count = self.steps.len();
        if count == 0 || count > MAX_STEPS {
            return Err(InvariantViolation::StepCount { count });
        }

        let mut ids = HashSet::with_capacity(count);
        for step in &self.steps {
            if is_terminal_marker(&step.id) {
                return Err(InvariantViolation::ReservedStepId(step.id.clone()));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(InvariantViolation::DuplicateStepId(step.id.clone()));
            }
        }
        if !ids.contains(self.entry_step_id.as_str()) {
            return Err(InvariantViolation::MissingEntry(self.entry_step_id.clone()));
        }

        for step in &self.steps {
            verify_step(step, &ids)?;
        }
        Ok(())
    }

    /// Parse a canonical (already normalized) document and re-check it.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match the canonical shape or an
    /// invariant does not hold.
    pub fn from_canonical_json(json: &str) -> Result<Self, CanonicalError> {
        let scenario: Self = serde_json::from_str(json)?;
        scenario.verify()?;
        Ok(scenario)
    }
}

/// Failure to accept a canonical scenario document.
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("canonical scenario is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical scenario breaks an invariant: {0}")]
    Invariant(#[from] InvariantViolation),
}

fn verify_step(step: &Step, ids: &HashSet<&str>) -> Result<(), InvariantViolation> {
    let count = step.options.len();
    if count > MAX_OPTIONS {
        return Err(InvariantViolation::TooManyOptions {
            step: step.id.clone(),
            count,
        });
    }
    if step.kind.expects_choices() && count < MIN_CHOICE_OPTIONS {
        return Err(InvariantViolation::KindOptionMismatch {
            step: step.id.clone(),
            kind: step.kind,
            count,
        });
    }

    let mut option_ids = HashSet::with_capacity(count);
    for choice in &step.options {
        if !option_ids.insert(choice.id.as_str()) {
            return Err(InvariantViolation::DuplicateOptionId {
                step: step.id.clone(),
                option: choice.id.clone(),
            });
        }
    }

    let targets = step
        .options
        .iter()
        .map(|choice| &choice.next)
        .chain(std::iter::once(&step.continuation));
    for next in targets {
        if let Some(target) = next.target()
            && !ids.contains(target)
        {
            return Err(InvariantViolation::DanglingReference {
                step: step.id.clone(),
                target: target.to_string(),
            });
        }
    }
    Ok(())
}
