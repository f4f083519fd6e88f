use super::states::TaskState;
use crate::error::TaskmanError;
use crate::models::TaskId;
use crate::store::StoreError;
use thiserror::Error;

/// Error types for task state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on event {event}")]
    InvalidTransition { from: TaskState, event: String },

    #[error("Task {task_id} is already terminal ({state})")]
    AlreadyTerminal { task_id: TaskId, state: TaskState },

    #[error("Persistence operation failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;

impl From<StateMachineError> for TaskmanError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::AlreadyTerminal { task_id, state } => {
                TaskmanError::TaskAlreadyTerminal {
                    task_id,
                    status: state,
                }
            }
            StateMachineError::Persistence(store) => store.into(),
            StateMachineError::Validation(msg) => TaskmanError::ValidationError(msg),
            other @ StateMachineError::InvalidTransition { .. } => {
                TaskmanError::StateTransitionError(other.to_string())
            }
        }
    }
}
