//! Persistence gateway for scenarios and play records.
//!
//! Storage is behind [`ScenarioStore`] so callers can swap the file-backed
//! store for an in-memory one. Every scenario read back from storage is
//! re-checked with [`Scenario::verify`]; stored data is never trusted blindly.
use log::debug;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

use crate::constants::LOG_TARGET_STORE;
use crate::model::{InvariantViolation, Scenario};
use crate::trace::PlayRecord;

const SCENARIO_DIR: &str = "scenarios";
const RECORD_DIR: &str = "traces";
const JSON_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored data could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("stored scenario {id} is invalid: {violation}")]
    Invalid {
        id: String,
        violation: InvariantViolation,
    },
    #[error("'{0}' is not a usable storage key")]
    BadKey(String),
}

/// Abstract save/load of scenarios and play records.
pub trait ScenarioStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist a scenario under its id, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns an error if the scenario cannot be written.
    fn save_scenario(&self, scenario: &Scenario) -> Result<(), Self::Error>;

    /// Load a scenario; `Ok(None)` when nothing is stored under `scenario_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data cannot be read or fails validation.
    fn load_scenario(&self, scenario_id: &str) -> Result<Option<Scenario>, Self::Error>;

    /// Ids of every stored scenario, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be read.
    fn list_scenarios(&self) -> Result<Vec<String>, Self::Error>;

    /// Persist a finished session's play record under its session id.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn save_trace(&self, record: &PlayRecord) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if stored data cannot be read.
    fn load_trace(&self, session_id: &str) -> Result<Option<PlayRecord>, Self::Error>;
}

/// Store that lives only as long as the process; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    scenarios: Rc<RefCell<BTreeMap<String, Scenario>>>,
    records: Rc<RefCell<BTreeMap<String, PlayRecord>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn trace_count(&self) -> usize {
        self.records.borrow().len()
    }
}

impl ScenarioStore for MemoryStore {
    type Error = StoreError;

    fn save_scenario(&self, scenario: &Scenario) -> Result<(), Self::Error> {
        self.scenarios
            .borrow_mut()
            .insert(scenario.id.clone(), scenario.clone());
        Ok(())
    }

    fn load_scenario(&self, scenario_id: &str) -> Result<Option<Scenario>, Self::Error> {
        let Some(scenario) = self.scenarios.borrow().get(scenario_id).cloned() else {
            return Ok(None);
        };
        verified(scenario).map(Some)
    }

    fn list_scenarios(&self) -> Result<Vec<String>, Self::Error> {
        Ok(self.scenarios.borrow().keys().cloned().collect())
    }

    fn save_trace(&self, record: &PlayRecord) -> Result<(), Self::Error> {
        self.records
            .borrow_mut()
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    fn load_trace(&self, session_id: &str) -> Result<Option<PlayRecord>, Self::Error> {
        Ok(self.records.borrow().get(session_id).cloned())
    }
}

/// JSON files under a root directory:
/// `scenarios/<id>.json` and `traces/<session>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(SCENARIO_DIR))?;
        fs::create_dir_all(root.join(RECORD_DIR))?;
        debug!(target: LOG_TARGET_STORE, "file store at {}", root.display());
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, dir: &str, key: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_key(key) {
            return Err(StoreError::BadKey(key.to_string()));
        }
        Ok(self
            .root
            .join(dir)
            .join(format!("{key}.{JSON_EXTENSION}")))
    }

    fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(path) {
            Ok(json) => Ok(Some(json)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Write through a temporary sibling so readers never see partial files.
    fn write_atomic(path: &Path, json: &str) -> Result<(), StoreError> {
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}

impl ScenarioStore for FileStore {
    type Error = StoreError;

    fn save_scenario(&self, scenario: &Scenario) -> Result<(), Self::Error> {
        let path = self.path_for(SCENARIO_DIR, &scenario.id)?;
        let json = serde_json::to_string_pretty(scenario)?;
        Self::write_atomic(&path, &json)?;
        debug!(target: LOG_TARGET_STORE, "saved scenario {}", scenario.id);
        Ok(())
    }

    fn load_scenario(&self, scenario_id: &str) -> Result<Option<Scenario>, Self::Error> {
        let path = self.path_for(SCENARIO_DIR, scenario_id)?;
        let Some(json) = Self::read_optional(&path)? else {
            return Ok(None);
        };
        let scenario: Scenario = serde_json::from_str(&json)?;
        verified(scenario).map(Some)
    }

    fn list_scenarios(&self) -> Result<Vec<String>, Self::Error> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(SCENARIO_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(JSON_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn save_trace(&self, record: &PlayRecord) -> Result<(), Self::Error> {
        let path = self.path_for(RECORD_DIR, &record.session_id)?;
        let json = serde_json::to_string_pretty(record)?;
        Self::write_atomic(&path, &json)
    }

    fn load_trace(&self, session_id: &str) -> Result<Option<PlayRecord>, Self::Error> {
        let path = self.path_for(RECORD_DIR, session_id)?;
        Self::read_optional(&path)?
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }
}

fn verified(scenario: Scenario) -> Result<Scenario, StoreError> {
    scenario.verify().map_err(|violation| StoreError::Invalid {
        id: scenario.id.clone(),
        violation,
    })?;
    Ok(scenario)
}

/// Map arbitrary text onto the key alphabet: anything outside
/// `[A-Za-z0-9_-]` becomes `-`. `None` when nothing alphanumeric survives.
#[must_use]
pub fn storage_key(raw: &str) -> Option<String> {
    let key: String = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    key.chars()
        .any(|ch| ch.is_ascii_alphanumeric())
        .then_some(key)
}

/// Keys become file names, so only a conservative character set is allowed.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::scoring::score;
    use crate::trace::Trace;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scenario() -> Scenario {
        normalize(&json!({
            "id": "stored",
            "title": "Stored",
            "steps": [
                { "id": "a", "text": "Call", "options": [
                    { "id": "x", "label": "Hang up", "outcome": "safe" },
                    { "id": "y", "label": "Talk", "outcome": "dangerous" }
                ] }
            ]
        }))
        .unwrap()
    }

    fn record(session_id: &str) -> PlayRecord {
        let trace = Trace::new();
        PlayRecord {
            session_id: session_id.to_string(),
            scenario_id: "stored".to_string(),
            score: score(&trace),
            trace,
            completed: false,
            end_reason: None,
            finished_at: Utc.with_ymd_and_hms(2026, 2, 2, 2, 2, 2).unwrap(),
        }
    }

    fn temp_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("scamsense-store-{tag}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn memory_store_roundtrips_and_shares_between_clones() {
        let store = MemoryStore::new();
        let view = store.clone();
        store.save_scenario(&scenario()).unwrap();
        store.save_trace(&record("s1")).unwrap();

        assert_eq!(view.load_scenario("stored").unwrap(), Some(scenario()));
        assert_eq!(view.list_scenarios().unwrap(), ["stored"]);
        assert_eq!(view.load_trace("s1").unwrap(), Some(record("s1")));
        assert_eq!(view.trace_count(), 1);
        assert!(view.load_scenario("other").unwrap().is_none());
    }

    #[test]
    fn file_store_roundtrips_scenarios_and_records() {
        let root = temp_root("roundtrip");
        let store = FileStore::open(&root).unwrap();
        store.save_scenario(&scenario()).unwrap();
        store.save_trace(&record("session-1")).unwrap();

        let reopened = FileStore::open(&root).unwrap();
        assert_eq!(reopened.load_scenario("stored").unwrap(), Some(scenario()));
        assert_eq!(reopened.list_scenarios().unwrap(), ["stored"]);
        assert_eq!(reopened.load_trace("session-1").unwrap(), Some(record("session-1")));
        assert!(reopened.load_trace("session-2").unwrap().is_none());

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn tampered_scenarios_fail_verification_on_load() {
        let root = temp_root("tampered");
        let store = FileStore::open(&root).unwrap();
        let mut broken = scenario();
        broken.steps[0].options[0].next = crate::model::NextStep::Step("ghost".to_string());
        store.save_scenario(&broken).unwrap();

        let err = store.load_scenario("stored").unwrap_err();
        assert!(matches!(err, StoreError::Invalid { ref id, .. } if id == "stored"));

        fs::write(root.join(SCENARIO_DIR).join("junk.json"), "{ nope").unwrap();
        assert!(matches!(
            store.load_scenario("junk"),
            Err(StoreError::Serialization(_))
        ));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn keys_that_escape_the_store_are_rejected() {
        let root = temp_root("keys");
        let store = FileStore::open(&root).unwrap();
        for key in ["", "../etc", "a/b", ".hidden"] {
            assert!(
                matches!(store.load_scenario(key), Err(StoreError::BadKey(_))),
                "{key:?}"
            );
        }
        fs::remove_dir_all(root).unwrap();
    }
}
