//! Outcome of one task's attempt sequence (initial try plus at most one retry).

use chrono::NaiveDateTime;

use super::errors::ErrorKind;
use super::result::ModuleResult;

/// What happened to a submitted task.
///
/// Produced exactly once per task. `completed_at` is only set on success; on failure
/// `error` carries the final message (the retry's message when a retry happened).
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub name: String,
    pub payload: Option<ModuleResult>,
    pub error: Option<TaskFailure>,
    pub completed_at: Option<NaiveDateTime>,
    pub duration_secs: f64,
    /// How many times retrieve→transform ran (1 or 2).
    pub attempts: u32,
}

/// Final failure of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskOutcome {
    pub fn succeeded(
        name: impl Into<String>,
        payload: ModuleResult,
        completed_at: NaiveDateTime,
        duration_secs: f64,
        attempts: u32,
    ) -> Self {
        Self {
            name: name.into(),
            payload: Some(payload),
            error: None,
            completed_at: Some(completed_at),
            duration_secs,
            attempts,
        }
    }

    pub fn failed(
        name: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        duration_secs: f64,
        attempts: u32,
    ) -> Self {
        Self {
            name: name.into(),
            payload: None,
            error: Some(TaskFailure {
                kind,
                message: message.into(),
            }),
            completed_at: None,
            duration_secs,
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
