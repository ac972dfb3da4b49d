#![allow(clippy::result_large_err)] // State module returns AppError to preserve structured diagnostic context; boxing would discard run-time state.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::utils::serialization::optional_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::time::Duration;

/// Textual sentinel for the start of the sorted sequence.
pub const FIRST_BOUNDARY: &str = "FirstBoundary";
/// Textual sentinel for the end of the sorted sequence.
pub const LAST_BOUNDARY: &str = "LastBoundary";

/// Lifecycle status shared by states and collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateStatus {
    #[default]
    Ready,
    Running,
    Succeeded,
    Failed,
    Skip,
    Preprocessing,
}

impl StateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateStatus::Ready => "READY",
            StateStatus::Running => "RUNNING",
            StateStatus::Succeeded => "SUCCEEDED",
            StateStatus::Failed => "FAILED",
            StateStatus::Skip => "SKIP",
            StateStatus::Preprocessing => "PREPROCESSING",
        }
    }

    /// Statuses that make a state eligible to run.
    pub fn is_runnable(&self) -> bool {
        matches!(self, StateStatus::Ready | StateStatus::Failed)
    }
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "READY" => Ok(StateStatus::Ready),
            "RUNNING" => Ok(StateStatus::Running),
            "SUCCEEDED" => Ok(StateStatus::Succeeded),
            "FAILED" => Ok(StateStatus::Failed),
            "SKIP" => Ok(StateStatus::Skip),
            "PREPROCESSING" => Ok(StateStatus::Preprocessing),
            other => Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("unknown state status '{}'", other),
            )
            .with_code("SG-STATE-001")),
        }
    }
}

/// When a state takes part in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    #[serde(rename = "normal")]
    Normal,
    /// Reset to READY every time a run reaches it.
    #[serde(rename = "AtEachRun")]
    AtEachRun,
}

/// One task node of a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub log_path: String,
    #[serde(default)]
    pub status: StateStatus,
    #[serde(default, with = "optional_timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub script: String,
    /// Minutes; zero disables the timeout.
    #[serde(default)]
    pub script_timeout: f64,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub prerequisite_states: Vec<String>,
    #[serde(default)]
    pub states_to_rerun: Vec<String>,
    #[serde(default)]
    pub rerun_on_run_of_states: Vec<String>,
    #[serde(default)]
    pub previous_states: Vec<String>,
    #[serde(default)]
    pub next_states: Vec<String>,
    #[serde(default)]
    pub executed_by_extension_name: String,
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub next_run: bool,
    #[serde(default)]
    pub is_extension: bool,
}

impl State {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            ..Default::default()
        }
    }

    /// A state standing for the nested collection of the same name.
    pub fn extension(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_extension: true,
            ..Default::default()
        }
    }

    pub fn has_explicit_edges(&self) -> bool {
        !self.previous_states.is_empty() || !self.next_states.is_empty()
    }

    /// Copy the fields a run writes (status, timing, attribution).
    pub fn copy_runtime_from(&mut self, other: &State) {
        self.status = other.status;
        self.start_time = other.start_time;
        self.end_time = other.end_time;
        self.reason = other.reason.clone();
        self.execution_id = other.execution_id.clone();
        self.executed_by_extension_name = other.executed_by_extension_name.clone();
    }

    /// Copy the user-editable definition, leaving runtime fields and edges alone.
    pub fn copy_definition_from(&mut self, other: &State) {
        self.label = other.label.clone();
        self.phase = other.phase;
        self.script = other.script.clone();
        self.script_timeout = other.script_timeout;
        self.protected = other.protected;
        self.is_extension = other.is_extension;
        self.prerequisite_states = other.prerequisite_states.clone();
        self.states_to_rerun = other.states_to_rerun.clone();
        self.rerun_on_run_of_states = other.rerun_on_run_of_states.clone();
        if !other.log_path.is_empty() {
            self.log_path = other.log_path.clone();
        }
    }

    pub fn clear_runtime(&mut self) {
        self.start_time = None;
        self.end_time = None;
        self.reason.clear();
        self.next_run = false;
    }

    pub fn clear_execution_info(&mut self) {
        self.execution_id.clear();
        self.executed_by_extension_name.clear();
    }

    /// Remove every reference to `name` from this state's edge and rerun lists.
    pub fn forget(&mut self, name: &str) {
        for list in [
            &mut self.previous_states,
            &mut self.next_states,
            &mut self.prerequisite_states,
            &mut self.states_to_rerun,
            &mut self.rerun_on_run_of_states,
        ] {
            list.retain(|entry| entry != name);
        }
    }

    pub(crate) fn validate_definition(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::new(ErrorCategory::ValidationError, "state name is required")
                .with_code("SG-STATE-002"));
        }
        if !self.is_extension && self.script.trim().is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("state '{}' requires a script", self.name),
            )
            .with_code("SG-STATE-003"));
        }
        script_timeout_duration(self.script_timeout).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("state '{}' has an invalid script_timeout: {}", self.name, err.message),
            )
            .with_code("SG-STATE-004")
        })?;
        Ok(())
    }
}

/// Persisted form of a collection: the backing file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDocument {
    #[serde(default)]
    pub states: Vec<State>,
    #[serde(default)]
    pub extension_name: String,
    #[serde(default)]
    pub parent_extension_name: String,
    #[serde(default)]
    pub executed_by_extension_name: String,
    #[serde(default)]
    pub execution_id: String,
    #[serde(default, with = "optional_timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: StateStatus,
}

impl CollectionDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            extension_name: name.into(),
            ..Default::default()
        }
    }

    /// A run owns the collection from preprocessing until it finishes.
    pub fn is_running(&self) -> bool {
        matches!(self.status, StateStatus::Running | StateStatus::Preprocessing)
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        position_of(&self.states, name)
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|state| state.name == name)
    }

    pub fn state_mut(&mut self, name: &str) -> Option<&mut State> {
        self.states.iter_mut().find(|state| state.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.states.iter().map(|state| state.name.clone()).collect()
    }

    /// Fail with ConflictError while a run owns the collection.
    pub fn ensure_idle(&self) -> Result<(), AppError> {
        if self.is_running() {
            return Err(AppError::conflict(format!(
                "collection '{}' is running, try later",
                self.extension_name
            )));
        }
        Ok(())
    }
}

/// A timeout in minutes as a duration. Zero means no timeout; negative,
/// non-finite and unrepresentable values are rejected.
pub fn script_timeout_duration(minutes: f64) -> Result<Option<Duration>, AppError> {
    if minutes == 0.0 {
        return Ok(None);
    }
    if !minutes.is_finite() || minutes < 0.0 {
        return Err(AppError::new(
            ErrorCategory::ValidationError,
            format!("{} is not a non-negative number of minutes", minutes),
        )
        .with_code("SG-STATE-008"));
    }
    Duration::try_from_secs_f64(minutes * 60.0)
        .map(Some)
        .map_err(|_| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("{} minutes is too large", minutes),
            )
            .with_code("SG-STATE-008")
        })
}

pub fn position_of(states: &[State], name: &str) -> Option<usize> {
    states.iter().position(|state| state.name == name)
}

/// Collection status implied by its states.
pub fn aggregate_status(states: &[State]) -> StateStatus {
    if states.iter().any(|state| state.status == StateStatus::Failed) {
        StateStatus::Failed
    } else if states
        .iter()
        .any(|state| matches!(state.status, StateStatus::Running | StateStatus::Preprocessing))
    {
        StateStatus::Running
    } else if !states.is_empty()
        && states
            .iter()
            .all(|state| matches!(state.status, StateStatus::Succeeded | StateStatus::Skip))
    {
        StateStatus::Succeeded
    } else {
        StateStatus::Ready
    }
}

/// Start or end marker of a ranged operation over the sorted sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Boundary {
    #[default]
    First,
    Last,
    State(String),
}

impl Boundary {
    pub fn state(name: impl Into<String>) -> Self {
        Boundary::State(name.into())
    }

    fn resolve(&self, states: &[State]) -> Result<usize, AppError> {
        match self {
            Boundary::First => Ok(0),
            Boundary::Last => Ok(states.len().saturating_sub(1)),
            Boundary::State(name) => position_of(states, name).ok_or_else(|| {
                AppError::new(
                    ErrorCategory::NotFoundError,
                    format!("boundary state '{}' does not exist", name),
                )
                .with_code("SG-STATE-005")
            }),
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::First => f.write_str(FIRST_BOUNDARY),
            Boundary::Last => f.write_str(LAST_BOUNDARY),
            Boundary::State(name) => f.write_str(name),
        }
    }
}

impl FromStr for Boundary {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "" => Err(
                AppError::new(ErrorCategory::ValidationError, "boundary cannot be empty")
                    .with_code("SG-STATE-006"),
            ),
            FIRST_BOUNDARY => Ok(Boundary::First),
            LAST_BOUNDARY => Ok(Boundary::Last),
            name => Ok(Boundary::State(name.to_string())),
        }
    }
}

/// Half-open index range of the sorted states between two boundaries (inclusive of both).
pub fn resolve_window(
    states: &[State],
    from: &Boundary,
    to: &Boundary,
) -> Result<Range<usize>, AppError> {
    if states.is_empty() {
        return Ok(0..0);
    }
    let start = from.resolve(states)?;
    let end = to.resolve(states)?;
    if start > end {
        return Err(AppError::new(
            ErrorCategory::ValidationError,
            format!("boundary '{}' sorts after boundary '{}'", from, to),
        )
        .with_code("SG-STATE-007"));
    }
    Ok(start..end + 1)
}
