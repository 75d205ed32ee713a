//! Scamsense Scenario Engine
//!
//! Platform-agnostic core of the scamsense social-engineering drills: it
//! normalizes untrusted scenario documents into validated branching graphs,
//! plays them one choice at a time, and scores the resulting trace.
//! Presentation, speech and accounts live outside this crate.

pub mod catalog;
pub mod config;
pub mod constants;
#[cfg(feature = "async")]
pub mod generation;
pub mod model;
pub mod normalize;
pub mod scoring;
pub mod session;
pub mod storage;
pub mod trace;

// Re-export commonly used types
pub use catalog::Catalog;
pub use config::{ConfigError, EngineConfig, RetryPolicy};
#[cfg(feature = "async")]
pub use generation::{
    CommandGenerator, GenerationError, GenerationGateway, GenerationRequest, Locale,
    TextGenerator, TransientKind, build_prompt,
};
pub use model::{
    CanonicalError, Channel, Choice, InvariantViolation, Narrative, NextStep, Outcome, Scenario,
    Step, StepKind,
};
pub use normalize::{
    Normalized, RepairReport, ValidationError, normalize, normalize_str, normalize_with_report,
};
pub use scoring::{OutcomeTally, ScoreCard, ScoreConfig, Verdict, score, score_with};
pub use session::{
    Advance, ChoiceFeedback, Clock, EndReason, FixedClock, OptionView, PlaySession, Prompt,
    SessionState, StepView, SystemClock, Transition, TraversalError,
};
pub use storage::{FileStore, MemoryStore, ScenarioStore, StoreError};
pub use trace::{PlayRecord, Trace, TraceEntry};

use serde_json::Value;
use std::hash::Hasher;
use std::sync::Arc;
use thiserror::Error;
use twox_hash::XxHash64;

/// Any failure surfaced by [`TrainingEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Traversal(#[from] TraversalError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[cfg(feature = "async")]
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("scenario store failed: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("no scenario with id '{0}' in the store or the built-in catalog")]
    UnknownScenario(String),
}

impl EngineError {
    fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store(Box::new(err))
    }
}

/// Main entry point tying normalization, storage, play and scoring together.
pub struct TrainingEngine<S>
where
    S: ScenarioStore,
{
    store: S,
    config: EngineConfig,
}

impl<S> TrainingEngine<S>
where
    S: ScenarioStore,
{
    /// Create an engine over `store` with the given tuning.
    pub const fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn with_default_config(store: S) -> Self {
        Self::new(store, EngineConfig::default())
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Normalize an untrusted document and persist the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the document holds no steps or cannot be stored.
    pub fn import_document(&self, raw: &Value) -> Result<Normalized, EngineError> {
        let normalized = normalize_with_report(raw)?;
        self.persist(normalized)
    }

    /// Like [`import_document`](Self::import_document) for generator text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON, holds no steps, or cannot
    /// be stored.
    pub fn import_str(&self, text: &str) -> Result<Normalized, EngineError> {
        let normalized = normalize_str(text)?;
        self.persist(normalized)
    }

    /// Look a scenario up in the store, then in the built-in catalog.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownScenario`] when neither has it.
    pub fn scenario(&self, scenario_id: &str) -> Result<Arc<Scenario>, EngineError> {
        // A store may refuse a built-in id as a key; the catalog still answers.
        match self.store.load_scenario(scenario_id) {
            Ok(Some(scenario)) => return Ok(Arc::new(scenario)),
            Ok(None) => {}
            Err(err) if Catalog::builtin().get(scenario_id).is_none() => {
                return Err(EngineError::store(err));
            }
            Err(_) => {}
        }
        Catalog::builtin()
            .get(scenario_id)
            .ok_or_else(|| EngineError::UnknownScenario(scenario_id.to_string()))
    }

    /// Stored scenario ids followed by built-in ids not shadowed by them.
    ///
    /// # Errors
    ///
    /// Returns an error if the store listing fails.
    pub fn list_scenarios(&self) -> Result<Vec<String>, EngineError> {
        let mut ids = self.store.list_scenarios().map_err(EngineError::store)?;
        for builtin in Catalog::builtin().ids() {
            if !ids.iter().any(|id| id == builtin) {
                ids.push(builtin.to_string());
            }
        }
        Ok(ids)
    }

    /// Begin a session at the scenario's entry step.
    ///
    /// # Errors
    ///
    /// Returns an error if the scenario cannot be found.
    pub fn start_session(&self, scenario_id: &str) -> Result<PlaySession, EngineError> {
        self.start_session_with_clock(scenario_id, SystemClock)
    }

    /// # Errors
    ///
    /// Returns an error if the scenario cannot be found.
    pub fn start_session_with_clock<C: Clock>(
        &self,
        scenario_id: &str,
        clock: C,
    ) -> Result<PlaySession<C>, EngineError> {
        let mut session = PlaySession::with_clock(self.scenario(scenario_id)?, clock);
        session.start()?;
        Ok(session)
    }

    /// Score a session and persist its play record. Unfinished sessions are
    /// recorded as abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    pub fn finish_session<C: Clock>(
        &self,
        session: &PlaySession<C>,
    ) -> Result<PlayRecord, EngineError> {
        let trace = session.trace().clone();
        let end_reason = session.end_reason().cloned();
        let completed = matches!(
            end_reason,
            Some(EndReason::ChoiceEnded { .. } | EndReason::DeadEnd { .. })
        );
        let finished_at = session.clock().now();
        let scenario_id = session.scenario().id.clone();
        let record = PlayRecord {
            session_id: session_id_for(&scenario_id, &trace, finished_at),
            scenario_id,
            score: score_with(&trace, &self.config.score),
            trace,
            completed,
            end_reason,
            finished_at,
        };
        self.store.save_trace(&record).map_err(EngineError::store)?;
        log::info!(
            "session {} finished: {} points, verdict {}",
            record.session_id,
            record.score.score,
            record.score.verdict
        );
        Ok(record)
    }

    /// Generate a scenario, normalize it and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if generation, normalization or storage fails.
    #[cfg(feature = "async")]
    pub async fn generate_and_store<G>(
        &self,
        gateway: &GenerationGateway<G>,
        request: &GenerationRequest,
    ) -> Result<Normalized, EngineError>
    where
        G: TextGenerator,
    {
        let normalized = gateway.generate_scenario(request).await?;
        self.persist(normalized)
    }

    fn persist(&self, normalized: Normalized) -> Result<Normalized, EngineError> {
        self.store
            .save_scenario(&normalized.scenario)
            .map_err(EngineError::store)?;
        Ok(normalized)
    }
}

/// Storage-safe session id: sanitized scenario id, finish time, trace hash.
fn session_id_for(
    scenario_id: &str,
    trace: &Trace,
    finished_at: chrono::DateTime<chrono::Utc>,
) -> String {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&serde_json::to_vec(trace).unwrap_or_default());
    let prefix = storage::storage_key(scenario_id).unwrap_or_else(|| "session".to_string());
    format!(
        "{prefix}-{}-{:08x}",
        finished_at.format("%Y%m%dT%H%M%S%3fZ"),
        hasher.finish() & 0xFFFF_FFFF
    )
}
