//! # Error Types
//!
//! Engine-level error taxonomy. Configuration errors (`UnknownTaskType`,
//! `DuplicateRegistration`, `InvalidHandlerSet`, `ConfigurationError`) are fatal at
//! the call site and never retried. `TaskNotFound`, `TaskAlreadyTerminal` and
//! `StageMismatch` are benign on the callback ingress path: external systems
//! deliver late or duplicate notifications and those must not be treated as
//! failures.

use crate::models::TaskId;
use crate::state_machine::TaskState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskmanError {
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),
    #[error("Task type already registered: {0}")]
    DuplicateRegistration(String),
    #[error("Invalid handler set for task type {task_type}: {reason}")]
    InvalidHandlerSet { task_type: String, reason: String },
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("Task {task_id} is already terminal ({status})")]
    TaskAlreadyTerminal { task_id: TaskId, status: TaskState },
    #[error("Stale callback for task {task_id}: callback stage {callback_stage}, recorded stage {recorded_stage}")]
    StageMismatch {
        task_id: TaskId,
        callback_stage: String,
        recorded_stage: String,
    },
    #[error("Persistence error: {0}")]
    PersistenceError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Work queue is full ({0} slots in use)")]
    QueueFull(usize),
    #[error("Task engine is shut down")]
    ShutDown,
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl TaskmanError {
    /// Errors that the callback ingress path tolerates silently.
    pub fn is_benign_callback_error(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound(_) | Self::TaskAlreadyTerminal { .. } | Self::StageMismatch { .. }
        )
    }

    /// Errors caused by process setup rather than by a particular task.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownTaskType(_)
                | Self::DuplicateRegistration(_)
                | Self::InvalidHandlerSet { .. }
                | Self::ConfigurationError(_)
        )
    }
}

impl From<serde_json::Error> for TaskmanError {
    fn from(error: serde_json::Error) -> Self {
        TaskmanError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<crate::config::ConfigurationError> for TaskmanError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        TaskmanError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskmanError>;
