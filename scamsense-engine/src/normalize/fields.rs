//! Loose field lookups over untrusted JSON.
//!
//! Every helper here is total: wrong types read as "absent" rather than
//! failing, so the caller decides the repair.
use serde_json::{Map, Value};

/// First present, non-null value under any of `keys`.
pub(super) fn first_value<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

/// Non-empty trimmed text. Numbers are stringified.
pub(super) fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// First key whose value reads as non-empty text.
pub(super) fn first_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(text_of)
}

/// First key holding an array.
pub(super) fn first_array<'a>(
    object: &'a Map<String, Value>,
    keys: &[&str],
) -> Option<&'a Vec<Value>> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(Value::as_array)
}

/// Identifier text: strings are trimmed, integers stringified.
pub(super) fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(_) | Value::Number(_) => text_of(value),
        _ => None,
    }
}

/// String map from a JSON object, skipping non-text entries.
pub(super) fn text_map(value: &Value) -> Vec<(String, String)> {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| text_of(value).map(|text| (key.clone(), text)))
                .collect()
        })
        .unwrap_or_default()
}

/// Strip a Markdown code fence (```json ... ```) around generated text.
pub(super) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
