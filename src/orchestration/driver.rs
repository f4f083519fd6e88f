//! # Driver Call Contract
//!
//! Uniform shape for a stage handler asking a provider driver to do remote
//! work. A driver either finishes synchronously ([`DriverOutcome::Completed`])
//! or accepts the work and reports back later through the [`TaskCallback`] it
//! was handed ([`DriverOutcome::Pending`]).
//!
//! A handler that gets `Pending` must already have recorded the stage the
//! callback resumes:
//!
//! ```rust,ignore
//! task.set_stage("OnDeallocateComplete", None).await?;
//! match driver.deallocate_disk(&disk, &host, task.callback()).await? {
//!     DriverOutcome::Pending => Ok(()),
//!     DriverOutcome::Completed(data) => this.on_deallocate_complete(task, StageData::success(data)).await,
//! }
//! ```

use super::task_manager::TaskManager;
use crate::error::Result;
use crate::models::TaskId;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Result of a driver call that did not fail outright
#[derive(Debug, Clone, PartialEq)]
pub enum DriverOutcome {
    /// Finished synchronously with result data
    Completed(Value),
    /// Accepted; the driver will call the task back
    Pending,
}

impl DriverOutcome {
    pub fn completed() -> Self {
        Self::Completed(Value::Null)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("{driver} driver does not implement {operation}")]
    NotImplemented { driver: String, operation: String },

    #[error("Remote operation failed: {0}")]
    Remote(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Driver unavailable: {0}")]
    Unavailable(String),
}

impl DriverError {
    pub fn not_implemented(driver: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotImplemented {
            driver: driver.into(),
            operation: operation.into(),
        }
    }
}

/// Handle a driver uses to report the outcome of asynchronous work
#[derive(Debug, Clone)]
pub struct TaskCallback {
    task_id: TaskId,
    stage: String,
    manager: TaskManager,
}

impl TaskCallback {
    pub fn new(task_id: TaskId, stage: impl Into<String>, manager: TaskManager) -> Self {
        Self {
            task_id,
            stage: stage.into(),
            manager,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Stage this callback resumes
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Report success with result data
    pub async fn succeed(&self, data: Value) -> Result<()> {
        self.deliver(true, data).await
    }

    /// Report failure with a reason
    pub async fn fail(&self, reason: impl Into<String>) -> Result<()> {
        self.deliver(false, json!({ "reason": reason.into() })).await
    }

    async fn deliver(&self, succeeded: bool, data: Value) -> Result<()> {
        match self
            .manager
            .notify_task_callback(self.task_id, &self.stage, succeeded, data)
            .await
        {
            Err(e) if e.is_benign_callback_error() => {
                info!(
                    task_id = %self.task_id,
                    stage = %self.stage,
                    reason = %e,
                    "🗑️ DRIVER: Late callback discarded"
                );
                Ok(())
            }
            other => other,
        }
    }
}

/// Bound a driver wait; handlers own their timeouts
pub async fn call_with_timeout<F, T>(
    operation: &str,
    after: Duration,
    call: F,
) -> std::result::Result<T, DriverError>
where
    F: Future<Output = std::result::Result<T, DriverError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_with_timeout_expires() {
        let err = call_with_timeout("deallocate_disk", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DriverError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DriverError::Timeout { .. }));
        assert!(err.to_string().contains("deallocate_disk"));
    }

    #[tokio::test]
    async fn test_call_with_timeout_passes_result_through() {
        let value = call_with_timeout("change_bandwidth", Duration::from_secs(1), async {
            Ok::<_, DriverError>(DriverOutcome::completed())
        })
        .await
        .unwrap();
        assert_eq!(value, DriverOutcome::Completed(Value::Null));
    }
}
