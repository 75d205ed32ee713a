//! Interactive traversal of a validated scenario.
//!
//! A [`PlaySession`] owns the mutable state of one playthrough: where the
//! player stands and the [`Trace`] of choices so far. It never scores;
//! callers hand the trace to [`crate::scoring`]. One caller drives one
//! session; the scenario itself is shared read-only behind an `Arc`.
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::constants::{LOG_TARGET_SESSION, MAX_TRANSITIONS};
use crate::model::{Narrative, NextStep, Outcome, Scenario, Step, StepKind};
use crate::trace::{Trace, TraceEntry};

/// Source of trace timestamps.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Rewind to the first reading; a no-op for real time.
    fn reset(&self) {}
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for replays: each reading advances one second.
#[derive(Debug, Clone)]
pub struct FixedClock {
    start: DateTime<Utc>,
    ticks: Cell<i64>,
}

impl FixedClock {
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            ticks: Cell::new(0),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let tick = self.ticks.get();
        self.ticks.set(tick + 1);
        self.start + Duration::seconds(tick)
    }

    fn reset(&self) {
        self.ticks.set(0);
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum EndReason {
    /// The chosen option pointed at the terminal marker.
    ChoiceEnded { step_id: String, option_id: String },
    /// The session reached a step with no options and no continuation.
    DeadEnd { step_id: String },
    /// The transition cap was hit (cyclic content).
    TransitionLimit,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChoiceEnded { step_id, option_id } => {
                write!(f, "option '{option_id}' at step '{step_id}' ended the scenario")
            }
            Self::DeadEnd { step_id } => write!(f, "step '{step_id}' ended the scenario"),
            Self::TransitionLimit => write!(f, "transition limit of {MAX_TRANSITIONS} reached"),
        }
    }
}

/// Position of a session in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingEntry,
    AtStep(String),
    Finished(EndReason),
}

/// Traversal-time rejection. Session state is unchanged when one is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TraversalError {
    #[error("option '{option}' is not offered at step '{step}'")]
    InvalidSelection { step: String, option: String },
    #[error("session has not started")]
    NotStarted,
    #[error("session already finished: {0}")]
    AlreadyFinished(EndReason),
    #[error("step '{0}' has no default continuation; choose an option")]
    NoContinuation(String),
    #[error("session already started")]
    AlreadyStarted,
    #[error("step '{0}' is missing from the scenario")]
    UnknownStep(String),
}

/// What the player is asked to do at a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    Choose,
    Continue,
    End,
}

/// Option as shown to the player; the outcome stays hidden until chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionView {
    pub id: String,
    pub label: String,
}

/// Renderable projection of the current step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepView {
    pub step_id: String,
    pub kind: StepKind,
    pub narrative: Narrative,
    pub options: Vec<OptionView>,
    pub prompt: Prompt,
}

impl StepView {
    fn of(step: &Step) -> Self {
        let prompt = if !step.options.is_empty() {
            Prompt::Choose
        } else if step.continuation.is_terminal() {
            Prompt::End
        } else {
            Prompt::Continue
        };
        Self {
            step_id: step.id.clone(),
            kind: step.kind,
            narrative: step.narrative.clone(),
            options: step
                .options
                .iter()
                .map(|choice| OptionView {
                    id: choice.id.clone(),
                    label: choice.label.clone(),
                })
                .collect(),
            prompt,
        }
    }
}

/// Result of moving through the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The session stands at a step. A view with [`Prompt::End`] is the
    /// final step and the session is already finished.
    At(StepView),
    /// The session ended without arriving at a new step.
    Ended(EndReason),
}

/// Explanation returned after a choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceFeedback {
    pub step_id: String,
    pub option_id: String,
    pub outcome: Outcome,
    pub feedback: Option<String>,
}

/// Outcome of [`PlaySession::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub feedback: ChoiceFeedback,
    pub transition: Transition,
}

/// One playthrough of a scenario.
#[derive(Debug)]
pub struct PlaySession<C: Clock = SystemClock> {
    scenario: Arc<Scenario>,
    state: SessionState,
    trace: Trace,
    transitions: usize,
    clock: C,
}

impl PlaySession<SystemClock> {
    #[must_use]
    pub fn new(scenario: Arc<Scenario>) -> Self {
        Self::with_clock(scenario, SystemClock)
    }
}

impl<C: Clock> PlaySession<C> {
    #[must_use]
    pub const fn with_clock(scenario: Arc<Scenario>, clock: C) -> Self {
        Self {
            scenario,
            state: SessionState::AwaitingEntry,
            trace: Trace::new(),
            transitions: 0,
            clock,
        }
    }

    #[must_use]
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub const fn trace(&self) -> &Trace {
        &self.trace
    }

    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Finished(_))
    }

    #[must_use]
    pub const fn end_reason(&self) -> Option<&EndReason> {
        match &self.state {
            SessionState::Finished(reason) => Some(reason),
            _ => None,
        }
    }

    /// View of the step the player stands at (or ended on).
    #[must_use]
    pub fn current_view(&self) -> Option<StepView> {
        let step_id = match &self.state {
            SessionState::AtStep(step_id)
            | SessionState::Finished(EndReason::DeadEnd { step_id }) => step_id,
            _ => return None,
        };
        self.scenario.step(step_id).map(StepView::of)
    }

    /// Enter the scenario at its entry step.
    ///
    /// # Errors
    ///
    /// Returns [`TraversalError::AlreadyStarted`] unless awaiting entry.
    pub fn start(&mut self) -> Result<Transition, TraversalError> {
        if self.state != SessionState::AwaitingEntry {
            return Err(TraversalError::AlreadyStarted);
        }
        let entry = self.scenario.entry_step_id.clone();
        debug!(
            target: LOG_TARGET_SESSION,
            "scenario {}: entering at {entry}",
            self.scenario.id
        );
        self.enter(&entry)
    }

    /// Pick an option at the current step.
    ///
    /// # Errors
    ///
    /// Returns [`TraversalError::InvalidSelection`] when the option is not
    /// offered here; the session is left untouched.
    pub fn advance(&mut self, option_id: &str) -> Result<Advance, TraversalError> {
        let step_id = self.current_step_id()?.to_string();
        let scenario = Arc::clone(&self.scenario);
        let step = scenario
            .step(&step_id)
            .ok_or_else(|| TraversalError::UnknownStep(step_id.clone()))?;
        let Some(choice) = step.option(option_id) else {
            warn!(
                target: LOG_TARGET_SESSION,
                "scenario {}: rejected option '{option_id}' at step '{step_id}'",
                scenario.id
            );
            return Err(TraversalError::InvalidSelection {
                step: step_id,
                option: option_id.to_string(),
            });
        };
        if let NextStep::Step(next) = &choice.next
            && scenario.step(next).is_none()
        {
            return Err(TraversalError::UnknownStep(next.clone()));
        }

        self.trace.push(TraceEntry {
            step_id: step_id.clone(),
            option_id: choice.id.clone(),
            outcome: choice.outcome,
            timestamp: self.clock.now(),
        });
        debug!(
            target: LOG_TARGET_SESSION,
            "scenario {}: {step_id}/{} -> {}",
            scenario.id,
            choice.id,
            choice.outcome
        );

        let feedback = ChoiceFeedback {
            step_id: step_id.clone(),
            option_id: choice.id.clone(),
            outcome: choice.outcome,
            feedback: choice.feedback.clone(),
        };
        let transition = match &choice.next {
            NextStep::Terminal => self.finish(EndReason::ChoiceEnded {
                step_id,
                option_id: choice.id.clone(),
            }),
            NextStep::Step(next) => self.enter(next)?,
        };
        Ok(Advance {
            feedback,
            transition,
        })
    }

    /// Follow the default continuation of an option-less step.
    ///
    /// # Errors
    ///
    /// Returns [`TraversalError::NoContinuation`] when the current step
    /// expects a choice instead.
    pub fn continue_on(&mut self) -> Result<Transition, TraversalError> {
        let step_id = self.current_step_id()?.to_string();
        let scenario = Arc::clone(&self.scenario);
        let step = scenario
            .step(&step_id)
            .ok_or_else(|| TraversalError::UnknownStep(step_id.clone()))?;
        match (&step.continuation, step.options.is_empty()) {
            (NextStep::Step(next), true) => self.enter(next),
            _ => Err(TraversalError::NoContinuation(step_id)),
        }
    }

    /// Reset to the entry for another attempt ("try again").
    ///
    /// The clock is rewound too, so a replay under [`FixedClock`] yields the
    /// same timestamps as the first run.
    pub fn restart(&mut self) {
        self.state = SessionState::AwaitingEntry;
        self.trace.clear();
        self.transitions = 0;
        self.clock.reset();
    }

    /// Consume the session, returning its trace.
    #[must_use]
    pub fn into_trace(self) -> Trace {
        self.trace
    }

    fn current_step_id(&self) -> Result<&str, TraversalError> {
        match &self.state {
            SessionState::AtStep(step_id) => Ok(step_id),
            SessionState::AwaitingEntry => Err(TraversalError::NotStarted),
            SessionState::Finished(reason) => Err(TraversalError::AlreadyFinished(reason.clone())),
        }
    }

    fn enter(&mut self, step_id: &str) -> Result<Transition, TraversalError> {
        let scenario = Arc::clone(&self.scenario);
        let step = scenario
            .step(step_id)
            .ok_or_else(|| TraversalError::UnknownStep(step_id.to_string()))?;
        self.transitions += 1;
        if self.transitions > MAX_TRANSITIONS {
            warn!(
                target: LOG_TARGET_SESSION,
                "scenario {}: transition limit reached at {step_id}",
                self.scenario.id
            );
            return Ok(self.finish(EndReason::TransitionLimit));
        }
        let view = StepView::of(step);
        self.state = if step.is_dead_end() {
            SessionState::Finished(EndReason::DeadEnd {
                step_id: step.id.clone(),
            })
        } else {
            SessionState::AtStep(step.id.clone())
        };
        Ok(Transition::At(view))
    }

    fn finish(&mut self, reason: EndReason) -> Transition {
        debug!(
            target: LOG_TARGET_SESSION,
            "scenario {}: finished ({reason})",
            self.scenario.id
        );
        self.state = SessionState::Finished(reason.clone());
        Transition::Ended(reason)
    }
}
