//! # Task Store
//!
//! Persistence seam for task rows.
//!
//! The engine only needs create, load-by-id, update-stage and mark-terminal;
//! the listing queries back parent/child lookups and the supervisor sweeps.
//! Stage writes are per-row last-write-wins; the engine's per-task
//! serialization keeps two invocations off the same row. Status writes are
//! compare-and-set on the expected current status, since `schedule_run`
//! starts a task outside that serialization.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::TaskmanError;
use crate::models::{Task, TaskId};
use crate::state_machine::TaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

pub use memory::InMemoryTaskStore;
#[cfg(feature = "postgres")]
pub use postgres::PgTaskStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task already exists: {0}")]
    Duplicate(TaskId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt task row {id}: {reason}")]
    Corrupt { id: TaskId, reason: String },

    #[error("Task {id} is {actual}, expected {expected}")]
    StatusConflict {
        id: TaskId,
        expected: TaskState,
        actual: TaskState,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for TaskmanError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => TaskmanError::TaskNotFound(id),
            StoreError::StatusConflict { id, actual, .. } if actual.is_terminal() => {
                TaskmanError::TaskAlreadyTerminal {
                    task_id: id,
                    status: actual,
                }
            }
            conflict @ StoreError::StatusConflict { .. } => {
                TaskmanError::StateTransitionError(conflict.to_string())
            }
            other => TaskmanError::PersistenceError(other.to_string()),
        }
    }
}

/// Persistence operations the engine needs for tasks
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a freshly created task
    async fn insert(&self, task: &Task) -> StoreResult<()>;

    /// Load a task by id, `NotFound` when absent
    async fn load(&self, id: TaskId) -> StoreResult<Task>;

    /// Record the next continuation together with the merged params
    async fn update_stage(&self, id: TaskId, stage: &str, params: &Value) -> StoreResult<()>;

    /// Move status from `from` to `to`; `StatusConflict` when the row is no
    /// longer in `from`. `reason` and `result` are stored alongside terminal states
    async fn update_status(
        &self,
        id: TaskId,
        from: TaskState,
        to: TaskState,
        reason: Option<&str>,
        result: Option<&Value>,
    ) -> StoreResult<()>;

    /// Children of `parent_id`, oldest first
    async fn find_by_parent(&self, parent_id: TaskId) -> StoreResult<Vec<Task>>;

    /// Tasks in `status`, optionally only those not updated since `updated_before`
    async fn find_by_status(
        &self,
        status: TaskState,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Task>>;

    /// Tasks created at or after `since`, oldest first
    async fn find_created_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Task>>;
}
