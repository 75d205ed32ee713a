//! Structural limits and wire-format vocabulary for scenario documents.
//!
//! These are invariants of the graph model, not tuning: the normalizer
//! enforces them and `Scenario::verify` re-checks them on load. Tunable
//! policy (reward curve, retry budget) lives in [`crate::config`].

/// Maximum number of steps kept from any document.
pub const MAX_STEPS: usize = 10;
/// Maximum number of options kept on any step.
pub const MAX_OPTIONS: usize = 4;
/// Minimum options for a step to count as a `question`/`decision`.
pub const MIN_CHOICE_OPTIONS: usize = 2;
/// Cap on transitions within one play session.
pub const MAX_TRANSITIONS: usize = 64;

/// Canonical terminal marker written into persisted documents.
pub const TERMINAL_MARKER: &str = "end";

pub(crate) const DEFAULT_TITLE: &str = "Untitled scenario";
pub(crate) const SYNTHETIC_STEP_PREFIX: &str = "step";
pub(crate) const SYNTHETIC_OPTION_PREFIX: &str = "opt";
pub(crate) const SCENARIO_ID_PREFIX: &str = "scn-";
pub(crate) const SCENARIO_HASH_SEED: u64 = 0x5CA3_5E75;

// Wire keys ----------------------------------------------------------------
pub(crate) const STEP_COLLECTION_KEYS: [&str; 4] = ["steps", "nodes", "scenes", "stages"];
pub(crate) const NESTED_SCENARIO_KEY: &str = "scenario";
pub(crate) const ID_KEYS: [&str; 1] = ["id"];
pub(crate) const KIND_KEYS: [&str; 2] = ["kind", "type"];
pub(crate) const NARRATIVE_KEYS: [&str; 7] = [
    "narrative",
    "text",
    "message",
    "body",
    "prompt",
    "question",
    "description",
];
pub(crate) const INFORMATION_FALLBACK_KEYS: [&str; 1] = ["content"];
pub(crate) const CHANNEL_KEYS: [&str; 1] = ["channel"];
pub(crate) const SENDER_KEYS: [&str; 2] = ["sender", "from"];
pub(crate) const DEFAULT_LOCALE: &str = "en";
pub(crate) const OPTION_COLLECTION_KEYS: [&str; 3] = ["options", "choices", "answers"];
pub(crate) const LABEL_KEYS: [&str; 2] = ["label", "text"];
pub(crate) const OUTCOME_KEYS: [&str; 2] = ["outcomeType", "outcome"];
pub(crate) const NEXT_KEYS: [&str; 3] = ["nextStepId", "next", "nextStep"];
pub(crate) const STEP_CONTINUATION_KEYS: [&str; 3] = ["continuation", "nextStepId", "next"];
pub(crate) const FEEDBACK_KEYS: [&str; 2] = ["feedback", "explanation"];
pub(crate) const TITLE_KEYS: [&str; 1] = ["title"];
pub(crate) const TITLE_VARIANT_KEYS: [&str; 2] = ["titleVariants", "titles"];
pub(crate) const SUMMARY_KEYS: [&str; 2] = ["completionSummary", "summary"];
pub(crate) const ENTRY_KEYS: [&str; 2] = ["entryStepId", "entry"];

// Logging keys -------------------------------------------------------------
pub(crate) const LOG_TARGET_NORMALIZE: &str = "scamsense::normalize";
pub(crate) const LOG_TARGET_SESSION: &str = "scamsense::session";
pub(crate) const LOG_TARGET_STORE: &str = "scamsense::store";
#[cfg(feature = "async")]
pub(crate) const LOG_TARGET_GENERATION: &str = "scamsense::generation";
