//! Turns untrusted scenario documents into validated [`Scenario`] graphs.
//!
//! Normalization runs in two passes. The first pass settles the step list:
//! truncation, ids, kinds, narratives and option truncation. Only once every
//! step id is final does the second pass resolve option outcomes and `next`
//! references against that id set, so a reference to a step dropped by
//! truncation is cleared instead of dangling.
//!
//! The functions here are total over any JSON value: a document either
//! becomes a scenario satisfying every invariant checked by
//! [`Scenario::verify`], or fails with a [`ValidationError`].

mod fields;
mod report;

pub use report::RepairReport;

use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::hash::Hasher;
use thiserror::Error;
use twox_hash::XxHash64;

use crate::constants::{
    CHANNEL_KEYS, DEFAULT_LOCALE, DEFAULT_TITLE, ENTRY_KEYS, FEEDBACK_KEYS, ID_KEYS,
    INFORMATION_FALLBACK_KEYS, KIND_KEYS, LABEL_KEYS, LOG_TARGET_NORMALIZE, MAX_OPTIONS,
    MAX_STEPS, MIN_CHOICE_OPTIONS, NARRATIVE_KEYS, NESTED_SCENARIO_KEY, NEXT_KEYS,
    OPTION_COLLECTION_KEYS, OUTCOME_KEYS, SCENARIO_HASH_SEED, SCENARIO_ID_PREFIX, SENDER_KEYS,
    STEP_COLLECTION_KEYS, STEP_CONTINUATION_KEYS, SUMMARY_KEYS, SYNTHETIC_OPTION_PREFIX,
    SYNTHETIC_STEP_PREFIX, TITLE_KEYS, TITLE_VARIANT_KEYS,
};
use crate::model::{
    Channel, Choice, Choices, Narrative, NextStep, Outcome, Scenario, Step, StepKind,
    is_terminal_marker,
};
use crate::storage::storage_key;
use fields::{first_array, first_text, first_value, id_of, strip_code_fence, text_map, text_of};

/// Why a document could not become a scenario.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// No non-empty steps collection under any accepted key.
    #[error("document contains no steps")]
    NoStepsFound,
    /// Text input was not parseable JSON.
    #[error("document is not valid JSON: {0}")]
    MalformedJson(String),
}

/// A validated scenario together with the repairs that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub scenario: Scenario,
    pub report: RepairReport,
}

/// Normalize an untyped document into a scenario.
///
/// # Errors
///
/// Returns [`ValidationError::NoStepsFound`] when no usable steps exist.
pub fn normalize(raw: &Value) -> Result<Scenario, ValidationError> {
    normalize_with_report(raw).map(|normalized| normalized.scenario)
}

/// Parse generator text (optionally wrapped in a Markdown fence) and normalize it.
///
/// # Errors
///
/// Returns [`ValidationError::MalformedJson`] when no JSON document can be
/// recovered from the text, or [`ValidationError::NoStepsFound`].
pub fn normalize_str(text: &str) -> Result<Normalized, ValidationError> {
    let body = strip_code_fence(text);
    let parsed = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(err) => embedded_object(body)
            .ok_or_else(|| ValidationError::MalformedJson(err.to_string()))?,
    };
    normalize_with_report(&parsed)
}

/// Normalize a document and report every repair applied.
///
/// # Errors
///
/// Returns [`ValidationError::NoStepsFound`] when no usable steps exist.
pub fn normalize_with_report(raw: &Value) -> Result<Normalized, ValidationError> {
    let (root, raw_steps) = locate_steps(raw).ok_or(ValidationError::NoStepsFound)?;
    let mut report = RepairReport::default();

    // Pass one: the step list, final ids and option drafts.
    if raw_steps.len() > MAX_STEPS {
        report.steps_truncated = raw_steps.len() - MAX_STEPS;
        debug!(
            target: LOG_TARGET_NORMALIZE,
            "truncating {} steps to {MAX_STEPS}",
            raw_steps.len()
        );
    }
    let kept = &raw_steps[..raw_steps.len().min(MAX_STEPS)];
    let step_ids = assign_step_ids(kept, &mut report);
    let drafts: Vec<StepDraft<'_>> = kept
        .iter()
        .zip(step_ids)
        .map(|(raw_step, id)| draft_step(raw_step, id, &mut report))
        .collect();

    // Pass two: outcomes and references against the final id set.
    let valid_ids: HashSet<&str> = drafts.iter().map(|draft| draft.id.as_str()).collect();
    let steps: Vec<Step> = drafts
        .iter()
        .map(|draft| resolve_step(draft, &valid_ids, &mut report))
        .collect();

    let entry_step_id = resolve_entry(root, &steps, &mut report);
    let (title, title_variants) = resolve_title(root);
    let completion_summary = root.and_then(|object| first_text(object, &SUMMARY_KEYS));
    let id = resolve_scenario_id(root, &steps, &mut report);

    if report.is_clean() {
        debug!(target: LOG_TARGET_NORMALIZE, "scenario {id}: accepted without repairs");
    } else {
        warn!(target: LOG_TARGET_NORMALIZE, "scenario {id}: repaired ({report})");
    }

    Ok(Normalized {
        scenario: Scenario {
            id,
            title,
            title_variants,
            entry_step_id,
            steps,
            completion_summary,
        },
        report,
    })
}

struct OptionDraft<'a> {
    id: String,
    label: String,
    outcome: Option<&'a Value>,
    next: Option<&'a Value>,
    feedback: Option<String>,
}

struct StepDraft<'a> {
    id: String,
    kind: StepKind,
    narrative: Narrative,
    options: Vec<OptionDraft<'a>>,
    continuation: Option<&'a Value>,
}

/// Steps collection plus the object that owns it (absent for bare arrays).
fn locate_steps(raw: &Value) -> Option<(Option<&Map<String, Value>>, &[Value])> {
    match raw {
        Value::Array(items) if !items.is_empty() => Some((None, items.as_slice())),
        Value::Object(object) => {
            if let Some(steps) = first_array(object, &STEP_COLLECTION_KEYS)
                .filter(|steps| !steps.is_empty())
            {
                return Some((Some(object), steps.as_slice()));
            }
            let nested = object.get(NESTED_SCENARIO_KEY)?.as_object()?;
            first_array(nested, &STEP_COLLECTION_KEYS)
                .filter(|steps| !steps.is_empty())
                .map(|steps| (Some(nested), steps.as_slice()))
        }
        _ => None,
    }
}

/// Recover `{...}` from prose surrounding a JSON object.
fn embedded_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn unique_id(prefix: &str, position: usize, taken: &HashSet<String>) -> String {
    let base = format!("{prefix}{position}");
    if !taken.contains(&base) {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Explicit ids win in document order; gaps and duplicates get `step{n}`.
fn assign_step_ids(raw_steps: &[Value], report: &mut RepairReport) -> Vec<String> {
    let mut taken = HashSet::with_capacity(raw_steps.len());
    let explicit: Vec<Option<String>> = raw_steps
        .iter()
        .map(|raw_step| {
            raw_step
                .as_object()
                .and_then(|object| first_value(object, &ID_KEYS))
                .and_then(id_of)
                .filter(|id| !is_terminal_marker(id))
                .filter(|id| taken.insert(id.clone()))
        })
        .collect();

    explicit
        .into_iter()
        .enumerate()
        .map(|(index, id)| {
            id.unwrap_or_else(|| {
                report.step_ids_synthesized += 1;
                let synthetic = unique_id(SYNTHETIC_STEP_PREFIX, index + 1, &taken);
                taken.insert(synthetic.clone());
                synthetic
            })
        })
        .collect()
}

fn draft_step<'a>(raw_step: &'a Value, id: String, report: &mut RepairReport) -> StepDraft<'a> {
    let Some(object) = raw_step.as_object() else {
        // A bare string is narration; anything else is an empty information step.
        report.kinds_coerced += 1;
        return StepDraft {
            id,
            kind: StepKind::Information,
            narrative: Narrative {
                text: text_of(raw_step).unwrap_or_default(),
                ..Narrative::default()
            },
            options: Vec::new(),
            continuation: None,
        };
    };

    let raw_options = first_array(object, &OPTION_COLLECTION_KEYS).map_or(&[][..], Vec::as_slice);
    let kind = coerce_kind(object, raw_options.len(), &id, report);
    let narrative = draft_narrative(object, kind, &id, report);

    if raw_options.len() > MAX_OPTIONS {
        report.options_truncated += raw_options.len() - MAX_OPTIONS;
        debug!(
            target: LOG_TARGET_NORMALIZE,
            "step {id}: truncating {} options to {MAX_OPTIONS}",
            raw_options.len()
        );
    }
    let options = draft_options(&raw_options[..raw_options.len().min(MAX_OPTIONS)], report);
    let continuation = if options.is_empty() {
        first_value(object, &STEP_CONTINUATION_KEYS)
    } else {
        None
    };

    StepDraft {
        id,
        kind,
        narrative,
        options,
        continuation,
    }
}

/// Unknown kinds become `question` with two or more options, else
/// `information`. Known choice kinds without enough options are demoted.
fn coerce_kind(
    object: &Map<String, Value>,
    option_count: usize,
    step_id: &str,
    report: &mut RepairReport,
) -> StepKind {
    let kept_options = option_count.min(MAX_OPTIONS);
    let declared = first_text(object, &KIND_KEYS).and_then(|raw| StepKind::parse(&raw));
    let kind = match declared {
        Some(kind) if kind.expects_choices() && kept_options < MIN_CHOICE_OPTIONS => {
            StepKind::Information
        }
        Some(kind) => return kind,
        None if kept_options >= MIN_CHOICE_OPTIONS => StepKind::Question,
        None => StepKind::Information,
    };
    report.kinds_coerced += 1;
    debug!(target: LOG_TARGET_NORMALIZE, "step {step_id}: kind coerced to {kind}");
    kind
}

fn draft_narrative(
    object: &Map<String, Value>,
    kind: StepKind,
    step_id: &str,
    report: &mut RepairReport,
) -> Narrative {
    let mut narrative = Narrative {
        channel: first_text(object, &CHANNEL_KEYS).map(|raw| Channel::parse(&raw)),
        sender: first_text(object, &SENDER_KEYS),
        text: String::new(),
    };

    let structured = NARRATIVE_KEYS
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(Value::as_object);
    if let Some(inner) = structured {
        // Canonical shape: { "channel": .., "sender": .., "text": .. }
        narrative.channel = narrative
            .channel
            .or_else(|| first_text(inner, &CHANNEL_KEYS).map(|raw| Channel::parse(&raw)));
        narrative.sender = narrative.sender.or_else(|| first_text(inner, &SENDER_KEYS));
        if let Some(text) = first_text(inner, &NARRATIVE_KEYS) {
            narrative.text = text;
            return narrative;
        }
    }

    if let Some(text) = first_text(object, &NARRATIVE_KEYS) {
        narrative.text = text;
    } else if kind == StepKind::Information
        && let Some(text) = first_text(object, &INFORMATION_FALLBACK_KEYS)
    {
        report.narrative_fallbacks += 1;
        debug!(target: LOG_TARGET_NORMALIZE, "step {step_id}: narrative taken from content");
        narrative.text = text;
    }
    narrative
}

fn draft_options<'a>(raw_options: &'a [Value], report: &mut RepairReport) -> Vec<OptionDraft<'a>> {
    let mut taken = HashSet::with_capacity(raw_options.len());
    let explicit: Vec<Option<String>> = raw_options
        .iter()
        .map(|raw| {
            raw.as_object()
                .and_then(|object| first_value(object, &ID_KEYS))
                .and_then(id_of)
                .filter(|id| taken.insert(id.clone()))
        })
        .collect();

    raw_options
        .iter()
        .zip(explicit)
        .enumerate()
        .map(|(index, (raw, id))| {
            let id = id.unwrap_or_else(|| {
                report.option_ids_synthesized += 1;
                let synthetic = unique_id(SYNTHETIC_OPTION_PREFIX, index + 1, &taken);
                taken.insert(synthetic.clone());
                synthetic
            });
            let object = raw.as_object();
            let label = object
                .and_then(|object| first_text(object, &LABEL_KEYS))
                .or_else(|| text_of(raw))
                .unwrap_or_else(|| format!("Option {}", index + 1));
            OptionDraft {
                id,
                label,
                outcome: object.and_then(|object| first_value(object, &OUTCOME_KEYS)),
                next: object.and_then(|object| first_value(object, &NEXT_KEYS)),
                feedback: object.and_then(|object| first_text(object, &FEEDBACK_KEYS)),
            }
        })
        .collect()
}

fn resolve_step(
    draft: &StepDraft<'_>,
    valid_ids: &HashSet<&str>,
    report: &mut RepairReport,
) -> Step {
    let options: Choices = draft
        .options
        .iter()
        .map(|option| Choice {
            id: option.id.clone(),
            label: option.label.clone(),
            outcome: resolve_outcome(option, &draft.id, report),
            next: resolve_next(option.next, valid_ids, &draft.id, report),
            feedback: option.feedback.clone(),
        })
        .collect();
    let continuation = resolve_next(draft.continuation, valid_ids, &draft.id, report);

    Step {
        id: draft.id.clone(),
        kind: draft.kind,
        narrative: draft.narrative.clone(),
        options,
        continuation,
    }
}

/// Unknown or missing outcomes are treated as the worst case.
fn resolve_outcome(option: &OptionDraft<'_>, step_id: &str, report: &mut RepairReport) -> Outcome {
    if let Some(outcome) = option
        .outcome
        .and_then(text_of)
        .and_then(|raw| Outcome::parse(&raw))
    {
        return outcome;
    }
    report.outcomes_coerced += 1;
    warn!(
        target: LOG_TARGET_NORMALIZE,
        "step {step_id} option {}: outcome {:?} coerced to dangerous",
        option.id,
        option.outcome
    );
    Outcome::Dangerous
}

fn resolve_next(
    raw: Option<&Value>,
    valid_ids: &HashSet<&str>,
    step_id: &str,
    report: &mut RepairReport,
) -> NextStep {
    let Some(raw) = raw else {
        return NextStep::Terminal;
    };
    match id_of(raw) {
        Some(target) if is_terminal_marker(&target) => NextStep::Terminal,
        Some(target) if valid_ids.contains(target.as_str()) => NextStep::Step(target),
        Some(target) => {
            report.references_cleared += 1;
            warn!(
                target: LOG_TARGET_NORMALIZE,
                "step {step_id}: dangling reference to '{target}' cleared to terminal"
            );
            NextStep::Terminal
        }
        // Blank strings read as "no next step".
        None if raw.as_str().is_some() => NextStep::Terminal,
        None => {
            report.references_cleared += 1;
            warn!(
                target: LOG_TARGET_NORMALIZE,
                "step {step_id}: unreadable reference {raw} cleared to terminal"
            );
            NextStep::Terminal
        }
    }
}

fn resolve_entry(
    root: Option<&Map<String, Value>>,
    steps: &[Step],
    report: &mut RepairReport,
) -> String {
    let first = steps.first().map(|step| step.id.clone()).unwrap_or_default();
    let Some(declared) = root.and_then(|object| first_text(object, &ENTRY_KEYS)) else {
        return first;
    };
    if steps.iter().any(|step| step.id == declared) {
        return declared;
    }
    report.entry_repaired = true;
    warn!(
        target: LOG_TARGET_NORMALIZE,
        "entry step '{declared}' not found; starting at '{first}'"
    );
    first
}

fn resolve_title(root: Option<&Map<String, Value>>) -> (String, BTreeMap<String, String>) {
    let Some(object) = root else {
        return (DEFAULT_TITLE.to_string(), BTreeMap::new());
    };

    let mut variants = BTreeMap::new();
    for key in TITLE_VARIANT_KEYS {
        if let Some(value) = object.get(key) {
            variants.extend(text_map(value));
        }
    }
    let declared = first_value(object, &TITLE_KEYS);
    if let Some(value) = declared.filter(|value| value.is_object()) {
        variants.extend(text_map(value));
    }

    let title = declared
        .and_then(text_of)
        .or_else(|| variants.get(DEFAULT_LOCALE).cloned())
        .or_else(|| variants.values().next().cloned())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    (title, variants)
}

/// Declared ids double as storage keys; unusable ones are rewritten.
fn resolve_scenario_id(
    root: Option<&Map<String, Value>>,
    steps: &[Step],
    report: &mut RepairReport,
) -> String {
    let Some(declared) = root.and_then(|object| first_text(object, &ID_KEYS)) else {
        return content_id(steps);
    };
    let id = storage_key(&declared).unwrap_or_else(|| content_id(steps));
    if id != declared {
        report.scenario_id_repaired = true;
        debug!(target: LOG_TARGET_NORMALIZE, "scenario id {declared:?} rewritten to {id}");
    }
    id
}

/// Deterministic id derived from the canonical step content.
fn content_id(steps: &[Step]) -> String {
    let canonical = serde_json::to_vec(steps).unwrap_or_default();
    let mut hasher = XxHash64::with_seed(SCENARIO_HASH_SEED);
    hasher.write(&canonical);
    format!("{SCENARIO_ID_PREFIX}{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options_json(count: usize) -> Vec<Value> {
        (1..=count)
            .map(|n| json!({ "id": format!("o{n}"), "label": format!("Choice {n}"), "outcomeType": "safe" }))
            .collect()
    }

    #[test]
    fn rejects_documents_without_steps() {
        for raw in [
            json!({}),
            json!({ "steps": [] }),
            json!({ "steps": "not a list" }),
            json!([]),
            json!(null),
            json!(42),
            json!("steps"),
            json!({ "scenario": { "title": "no steps" } }),
        ] {
            assert_eq!(normalize(&raw), Err(ValidationError::NoStepsFound), "{raw}");
        }
    }

    #[test]
    fn accepts_alternate_collection_keys_and_nesting() {
        let nodes = json!({ "nodes": [{ "text": "hello" }] });
        assert_eq!(normalize(&nodes).unwrap().steps.len(), 1);

        let nested = json!({ "scenario": { "title": "Nested", "scenes": [{ "text": "a" }] } });
        let scenario = normalize(&nested).unwrap();
        assert_eq!(scenario.title, "Nested");

        let bare = json!([{ "text": "one" }, { "text": "two" }]);
        let scenario = normalize(&bare).unwrap();
        assert_eq!(scenario.title, DEFAULT_TITLE);
        assert_eq!(scenario.entry_step_id, "step1");
    }

    #[test]
    fn truncation_clears_references_to_dropped_steps() {
        let steps: Vec<Value> = (1..=12)
            .map(|n| {
                json!({
                    "id": format!("s{n}"),
                    "kind": "question",
                    "narrative": format!("step {n}"),
                    "options": [
                        { "id": "go", "label": "Next", "outcomeType": "safe", "nextStepId": format!("s{}", n + 1) },
                        { "id": "stop", "label": "Stop", "outcomeType": "risky", "nextStepId": "end" }
                    ]
                })
            })
            .collect();
        let normalized = normalize_with_report(&json!({ "steps": steps })).unwrap();
        let scenario = &normalized.scenario;
        assert_eq!(scenario.steps.len(), MAX_STEPS);
        assert_eq!(scenario.steps[8].options[0].next, NextStep::Step("s10".to_string()));
        assert_eq!(scenario.steps[9].options[0].next, NextStep::Terminal);
        assert_eq!(normalized.report.steps_truncated, 2);
        assert_eq!(normalized.report.references_cleared, 1);
        assert!(scenario.verify().is_ok());
    }

    #[test]
    fn truncates_options_keeping_document_order() {
        let raw = json!({ "steps": [{ "id": "a", "kind": "question", "options": options_json(6) }] });
        let normalized = normalize_with_report(&raw).unwrap();
        let ids: Vec<&str> = normalized.scenario.steps[0]
            .options
            .iter()
            .map(|choice| choice.id.as_str())
            .collect();
        assert_eq!(ids, ["o1", "o2", "o3", "o4"]);
        assert_eq!(normalized.report.options_truncated, 2);
    }

    #[test]
    fn unknown_or_missing_outcomes_become_dangerous() {
        let raw = json!({ "steps": [{
            "id": "a",
            "options": [
                { "label": "Maybe", "outcomeType": "maybe" },
                { "label": "Silent" },
                { "label": "Fine", "outcome": "SAFE" },
                { "label": "Odd", "outcomeType": ["safe"] }
            ]
        }] });
        let normalized = normalize_with_report(&raw).unwrap();
        let outcomes: Vec<Outcome> = normalized.scenario.steps[0]
            .options
            .iter()
            .map(|choice| choice.outcome)
            .collect();
        assert_eq!(
            outcomes,
            [Outcome::Dangerous, Outcome::Dangerous, Outcome::Safe, Outcome::Dangerous]
        );
        assert_eq!(normalized.report.outcomes_coerced, 3);
    }

    #[test]
    fn synthesizes_step_ids_without_colliding_with_explicit_ones() {
        let raw = json!({ "steps": [
            { "text": "first" },
            { "id": "step1", "text": "explicit" },
            { "id": "step1", "text": "duplicate" },
            { "id": "end", "text": "reserved" }
        ] });
        let normalized = normalize_with_report(&raw).unwrap();
        let ids: Vec<&str> = normalized
            .scenario
            .steps
            .iter()
            .map(|step| step.id.as_str())
            .collect();
        assert_eq!(ids, ["step1-2", "step1", "step3", "step4"]);
        assert_eq!(normalized.report.step_ids_synthesized, 3);
        assert!(normalized.scenario.verify().is_ok());
    }

    #[test]
    fn synthetic_ids_resolve_references_written_against_them() {
        let raw = json!({ "steps": [
            { "text": "a", "options": [
                { "label": "on", "outcomeType": "safe", "nextStepId": "step2" },
                { "label": "off", "outcomeType": "dangerous", "nextStepId": "end_scammed" }
            ] },
            { "content": "the end" }
        ] });
        let scenario = normalize(&raw).unwrap();
        assert_eq!(scenario.steps[0].kind, StepKind::Question);
        assert_eq!(scenario.steps[0].options[0].next, NextStep::Step("step2".to_string()));
        assert_eq!(scenario.steps[0].options[1].next, NextStep::Terminal);
        assert_eq!(scenario.steps[1].kind, StepKind::Information);
        assert_eq!(scenario.steps[1].narrative.text, "the end");
    }

    #[test]
    fn kind_coercion_follows_option_count() {
        let raw = json!({ "steps": [
            { "id": "a", "kind": "puzzle", "options": options_json(3) },
            { "id": "b", "kind": "puzzle", "options": options_json(1) },
            { "id": "c", "kind": "decision", "options": options_json(1) },
            { "id": "d", "type": "Decision", "options": options_json(2) },
            { "id": "e", "kind": "info" }
        ] });
        let normalized = normalize_with_report(&raw).unwrap();
        let kinds: Vec<StepKind> = normalized.scenario.steps.iter().map(|step| step.kind).collect();
        assert_eq!(
            kinds,
            [
                StepKind::Question,
                StepKind::Information,
                StepKind::Information,
                StepKind::Decision,
                StepKind::Information
            ]
        );
        assert_eq!(normalized.report.kinds_coerced, 3);
    }

    #[test]
    fn content_fallback_only_applies_to_information_steps() {
        let raw = json!({ "steps": [
            { "id": "a", "kind": "information", "content": "read me" },
            { "id": "b", "kind": "question", "content": "ignored", "options": options_json(2) }
        ] });
        let normalized = normalize_with_report(&raw).unwrap();
        assert_eq!(normalized.scenario.steps[0].narrative.text, "read me");
        assert_eq!(normalized.scenario.steps[1].narrative.text, "");
        assert_eq!(normalized.report.narrative_fallbacks, 1);
    }

    #[test]
    fn wrong_typed_fields_are_repaired_not_rejected() {
        let raw = json!({
            "title": 17,
            "entryStepId": ["a"],
            "steps": [
                7,
                null,
                { "id": { "nested": true }, "options": "many", "narrative": false },
                { "id": 4, "options": [ "Just a label", 12, null ] }
            ]
        });
        let scenario = normalize(&raw).unwrap();
        assert_eq!(scenario.steps.len(), 4);
        assert_eq!(scenario.title, "17");
        assert_eq!(scenario.steps[3].id, "4");
        assert_eq!(scenario.steps[3].options[0].label, "Just a label");
        assert_eq!(scenario.steps[3].options[1].label, "12");
        assert_eq!(scenario.steps[3].options[2].label, "Option 3");
        assert!(scenario.verify().is_ok());
    }

    #[test]
    fn step_continuation_only_kept_for_optionless_steps() {
        let raw = json!({ "steps": [
            { "id": "intro", "kind": "information", "text": "hi", "nextStepId": "ask" },
            { "id": "ask", "text": "?", "next": "intro", "options": options_json(2) },
            { "id": "outro", "kind": "information", "next": "missing" }
        ] });
        let normalized = normalize_with_report(&raw).unwrap();
        let steps = &normalized.scenario.steps;
        assert_eq!(steps[0].continuation, NextStep::Step("ask".to_string()));
        assert_eq!(steps[1].continuation, NextStep::Terminal);
        assert_eq!(steps[2].continuation, NextStep::Terminal);
        assert_eq!(normalized.report.references_cleared, 1);
    }

    #[test]
    fn entry_and_title_variants_resolve() {
        let raw = json!({
            "id": "sms-parcel",
            "title": { "en": "Parcel SMS", "id": "SMS Paket" },
            "entryStepId": "b",
            "summary": "Never click tracking links from unknown senders.",
            "steps": [{ "id": "a", "text": "x" }, { "id": "b", "text": "y" }]
        });
        let scenario = normalize(&raw).unwrap();
        assert_eq!(scenario.id, "sms-parcel");
        assert_eq!(scenario.title, "Parcel SMS");
        assert_eq!(scenario.title_for("id"), "SMS Paket");
        assert_eq!(scenario.entry_step_id, "b");
        assert!(scenario.completion_summary.is_some());

        let broken_entry = json!({ "entry": "zzz", "steps": [{ "id": "a" }] });
        let normalized = normalize_with_report(&broken_entry).unwrap();
        assert_eq!(normalized.scenario.entry_step_id, "a");
        assert!(normalized.report.entry_repaired);
    }

    #[test]
    fn generated_ids_are_content_derived_and_stable() {
        let raw = json!({ "steps": [{ "id": "a", "text": "same" }] });
        let first = normalize(&raw).unwrap();
        let second = normalize(&raw).unwrap();
        assert!(first.id.starts_with(SCENARIO_ID_PREFIX));
        assert_eq!(first.id, second.id);

        let other = normalize(&json!({ "steps": [{ "id": "a", "text": "different" }] })).unwrap();
        assert_ne!(first.id, other.id);
    }

    #[test]
    fn declared_ids_are_rewritten_into_storage_keys() {
        let spaced = normalize_with_report(&json!({ "id": "Parcel SMS scam", "steps": [{ "text": "hi" }] }))
            .unwrap();
        assert_eq!(spaced.scenario.id, "Parcel-SMS-scam");
        assert!(spaced.report.scenario_id_repaired);
        assert_eq!(spaced.report.to_string(), "scenario id repaired: 1");

        let hidden = normalize(&json!({ "id": "../.secret", "steps": [{ "text": "hi" }] })).unwrap();
        assert_eq!(hidden.id, "----secret");

        let unusable = normalize_with_report(&json!({ "id": "/ . /", "steps": [{ "text": "hi" }] }))
            .unwrap();
        assert!(unusable.scenario.id.starts_with(SCENARIO_ID_PREFIX));
        assert!(unusable.report.scenario_id_repaired);

        let clean = normalize_with_report(&json!({ "id": "sms_fee-2", "steps": [{ "text": "hi" }] }))
            .unwrap();
        assert_eq!(clean.scenario.id, "sms_fee-2");
        assert!(!clean.report.scenario_id_repaired);
    }

    #[test]
    fn normalize_str_handles_fences_prose_and_garbage() {
        let fenced = "```json\n{\"steps\":[{\"id\":\"a\",\"text\":\"x\"}]}\n```";
        assert_eq!(normalize_str(fenced).unwrap().scenario.steps.len(), 1);

        let chatty = "Sure! Here is your scenario: {\"steps\":[{\"text\":\"x\"}]} Enjoy.";
        assert_eq!(normalize_str(chatty).unwrap().scenario.steps[0].id, "step1");

        assert!(matches!(
            normalize_str("this is not json"),
            Err(ValidationError::MalformedJson(_))
        ));
        assert_eq!(normalize_str("{}"), Err(ValidationError::NoStepsFound));
    }

    #[test]
    fn canonical_output_normalizes_to_itself() {
        let raw = json!({
            "title": "Call",
            "steps": [
                { "text": "Ring ring", "channel": "phone", "sender": "+1 555", "next": "step2" },
                { "text": "Give OTP?", "options": [
                    { "label": "Hang up", "outcomeType": "safe", "feedback": "Good." },
                    { "label": "Read code", "outcomeType": "dangerous", "nextStepId": "end_scammed" }
                ] }
            ]
        });
        let first = normalize_with_report(&raw).unwrap();
        let canonical = serde_json::to_value(&first.scenario).unwrap();
        let second = normalize_with_report(&canonical).unwrap();
        assert_eq!(second.scenario, first.scenario);
        assert!(second.report.is_clean(), "{}", second.report);
    }
}
