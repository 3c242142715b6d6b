use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Smallest accepted per-execution timeout in seconds
pub const MIN_TIMEOUT_SECONDS: u64 = 10;
/// Largest accepted per-execution timeout in seconds
pub const MAX_TIMEOUT_SECONDS: u64 = 3600;
/// Timeout applied when a request does not specify one
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Errors raised while building an [`ExecutionRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error(
        "timeout of {0} seconds is outside the allowed range [{MIN_TIMEOUT_SECONDS}, {MAX_TIMEOUT_SECONDS}]"
    )]
    TimeoutOutOfRange(u64),

    #[error("invalid {kind} '{value}': must be a non-empty name without path separators")]
    InvalidIdentifier { kind: &'static str, value: String },
}

/// Check that an identifier can be used as a single path component.
pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), RequestError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(RequestError::InvalidIdentifier {
            kind,
            value: value.to_owned(),
        });
    }
    Ok(())
}

/// Address of one execution's artifacts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionKey {
    pub study_id: String,
    pub execution_id: String,
}

impl ExecutionKey {
    pub fn new(study_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            study_id: study_id.into(),
            execution_id: execution_id.into(),
        }
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.study_id, self.execution_id)
    }
}

/// A validated request to run a study once
///
/// Fields are private so that an accepted request cannot change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    key: ExecutionKey,
    parameters: BTreeMap<String, Value>,
    timeout_seconds: u64,
}

impl ExecutionRequest {
    /// Create a request with the default timeout and no parameters
    pub fn new(
        study_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let key = ExecutionKey::new(study_id, execution_id);
        validate_identifier("study id", &key.study_id)?;
        validate_identifier("execution id", &key.execution_id)?;
        Ok(Self {
            key,
            parameters: BTreeMap::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        })
    }

    /// Set the wall clock timeout, rejecting values outside [10, 3600]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Result<Self, RequestError> {
        if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&seconds) {
            return Err(RequestError::TimeoutOutOfRange(seconds));
        }
        self.timeout_seconds = seconds;
        Ok(self)
    }

    /// Replace all parameters
    pub fn with_parameters(mut self, parameters: BTreeMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add a single parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> &ExecutionKey {
        &self.key
    }

    pub fn study_id(&self) -> &str {
        &self.key.study_id
    }

    pub fn execution_id(&self) -> &str {
        &self.key.execution_id
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    /// Parameters rendered as a JSON object
    pub fn parameters_json(&self) -> String {
        let object: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(object).to_string()
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Lifecycle state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (ExecutionState::Pending, ExecutionState::Running)
                | (ExecutionState::Running, ExecutionState::Completed)
                | (ExecutionState::Running, ExecutionState::Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Pending => write!(f, "pending"),
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Completed => write!(f, "completed"),
            ExecutionState::Failed => write!(f, "failed"),
        }
    }
}

/// Persisted status record of one execution
///
/// Values are built through the transition methods, which keep the record
/// internally consistent: `completed_at` is set exactly in terminal states,
/// `error_message` only when failed, `results_available` only when completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub study_id: String,
    pub execution_id: String,
    #[serde(rename = "status")]
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub results_available: bool,
}

impl ExecutionStatus {
    /// Fresh status for an accepted request
    pub fn pending(key: &ExecutionKey, created_at: DateTime<Utc>) -> Self {
        Self {
            study_id: key.study_id.clone(),
            execution_id: key.execution_id.clone(),
            state: ExecutionState::Pending,
            created_at,
            completed_at: None,
            error_message: None,
            results_available: false,
        }
    }

    pub fn key(&self) -> ExecutionKey {
        ExecutionKey::new(&self.study_id, &self.execution_id)
    }

    /// pending → running
    pub fn start(self) -> Result<Self, InvalidTransition> {
        self.transition(ExecutionState::Running)
    }

    /// running → completed, with a results artifact available
    pub fn complete(self, at: DateTime<Utc>) -> Result<Self, InvalidTransition> {
        let mut next = self.transition(ExecutionState::Completed)?;
        next.completed_at = Some(at);
        next.results_available = true;
        Ok(next)
    }

    /// running → failed
    pub fn fail(
        self,
        at: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Result<Self, InvalidTransition> {
        let mut next = self.transition(ExecutionState::Failed)?;
        next.completed_at = Some(at);
        next.error_message = Some(message.into());
        Ok(next)
    }

    fn transition(mut self, to: ExecutionState) -> Result<Self, InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(self)
    }

    /// Check the field invariants tied to the state
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let terminal = self.state.is_terminal();
        terminal == self.completed_at.is_some()
            && (!self.results_available || self.state == ExecutionState::Completed)
            && (self.error_message.is_none() || self.state == ExecutionState::Failed)
    }
}

/// Rejected state machine transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid execution state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: ExecutionState,
    pub to: ExecutionState,
}

/// Structured result produced by a runnable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionResult(Value);

impl ExecutionResult {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Fallback shape for output that is not structured data
    pub fn text(output: impl Into<String>) -> Self {
        let mut record = Map::new();
        record.insert("output".to_owned(), Value::String(output.into()));
        record.insert("type".to_owned(), Value::String("text".to_owned()));
        Self(Value::Object(record))
    }

    /// Whether this result is the text fallback record
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.0.get("type").and_then(Value::as_str) == Some("text")
            && self.0.get("output").is_some_and(Value::is_string)
            && self.0.as_object().is_some_and(|o| o.len() == 2)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// Outcome of a child process that ran to completion
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Exit code if the process exited normally
    pub exit_code: Option<i32>,

    /// Signal number if the process was killed by a signal
    pub signal: Option<i32>,

    /// Captured standard output
    pub stdout: Vec<u8>,

    /// Captured standard error
    pub stderr: Vec<u8>,

    /// Whether stdout was cut at the output cap
    pub stdout_truncated: bool,

    /// Whether stderr was cut at the output cap
    pub stderr_truncated: bool,

    /// Wall clock time from spawn to exit
    pub duration: Duration,
}

impl RunOutcome {
    /// Check if the process exited with code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
