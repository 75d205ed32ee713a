use log::warn;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

use crate::constants::LOG_TARGET_NORMALIZE;
use crate::model::Scenario;
use crate::normalize::normalize;

const BUILTIN_SCENARIO_DATA: &str = include_str!("../assets/scenarios.json");

#[derive(Debug, Default, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    scenarios: Vec<Value>,
}

/// Scenarios shipped with the engine, normalized once on first use.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    scenarios: Vec<Arc<Scenario>>,
}

impl Catalog {
    /// Build a catalog from a `{ "scenarios": [...] }` document.
    ///
    /// Entries that cannot be normalized are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the document itself is not valid JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        let scenarios = document
            .scenarios
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| match normalize(raw) {
                Ok(scenario) => Some(Arc::new(scenario)),
                Err(err) => {
                    warn!(target: LOG_TARGET_NORMALIZE, "catalog entry {index} skipped: {err}");
                    None
                }
            })
            .collect();
        Ok(Self { scenarios })
    }

    #[must_use]
    pub fn load_from_static() -> Self {
        Self::from_json(BUILTIN_SCENARIO_DATA).unwrap_or_default()
    }

    #[must_use]
    pub fn builtin() -> &'static Self {
        static CATALOG: OnceLock<Catalog> = OnceLock::new();
        CATALOG.get_or_init(Self::load_from_static)
    }

    #[must_use]
    pub fn get(&self, scenario_id: &str) -> Option<Arc<Scenario>> {
        self.scenarios
            .iter()
            .find(|scenario| scenario.id == scenario_id)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Scenario>> {
        self.scenarios.iter()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.scenarios.iter().map(|scenario| scenario.id.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}
