//! # Task Supervisor
//!
//! Periodic background sweeps over the task store.
//!
//! - **Staleness**: `running` tasks whose row has not been updated for
//!   `supervision.stale_task_timeout_seconds` are force-failed. Handlers bound
//!   their own driver waits; this catches callbacks that never arrive.
//! - **Retry**: for task types listed in `retry.task_types`, failed top-level
//!   tasks created within `retry.window_seconds` are re-created as brand-new
//!   tasks, each recording `retry_of` and `attempt` in its params, until
//!   `retry.max_attempts` is reached. A failed task is re-created at most once.

use super::task_manager::TaskManager;
use crate::config::{RetryConfig, SupervisionConfig};
use crate::constants::params::{ATTEMPT, RETRY_OF};
use crate::constants::reasons;
use crate::error::Result;
use crate::models::{merge_params, NewTask, Task};
use crate::state_machine::TaskState;
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counts from one pass of both sweeps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stale_failed: usize,
    pub retried: usize,
}

pub struct TaskSupervisor {
    manager: TaskManager,
    supervision: SupervisionConfig,
    retry: RetryConfig,
}

impl TaskSupervisor {
    pub fn new(manager: TaskManager, supervision: SupervisionConfig, retry: RetryConfig) -> Self {
        Self {
            manager,
            supervision,
            retry,
        }
    }

    /// Force-fail `running` tasks that made no progress within the timeout
    pub async fn sweep_stale_tasks(&self) -> Result<usize> {
        let Some(timeout) = self.supervision.stale_task_timeout() else {
            return Ok(0);
        };
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let stale = self
            .manager
            .store()
            .find_by_status(TaskState::Running, Some(cutoff))
            .await?;

        let mut failed = 0;
        for task in stale {
            let reason = format!("{} for {}s", reasons::STALE_TASK, timeout.as_secs());
            match self.manager.force_fail(task.id, reason).await {
                Ok(()) => {
                    warn!(
                        task_id = %task.id,
                        task_type = %task.task_type,
                        stage = %task.stage,
                        "⏰ SUPERVISOR: Failing stale task"
                    );
                    failed += 1;
                }
                Err(e) if e.is_benign_callback_error() => {
                    debug!(task_id = %task.id, "⏰ SUPERVISOR: Stale task finished meanwhile");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    /// Re-create eligible failed tasks
    pub async fn sweep_failed_tasks(&self) -> Result<usize> {
        if !self.retry.enabled || self.retry.task_types.is_empty() {
            return Ok(0);
        }
        let since = Utc::now() - chrono::Duration::seconds(self.retry.window_seconds as i64);
        let recent = self.manager.store().find_created_since(since).await?;

        let already_retried: HashSet<String> = recent
            .iter()
            .filter_map(|t| t.param_str(RETRY_OF).map(str::to_string))
            .collect();

        let mut retried = 0;
        for task in recent.iter().filter(|t| self.is_retry_candidate(t)) {
            if already_retried.contains(&task.id.to_string()) {
                continue;
            }
            let attempt = Self::attempt_of(task);
            let mut retry_params = task.params.clone();
            merge_params(
                &mut retry_params,
                json!({
                    RETRY_OF: task.id.to_string(),
                    ATTEMPT: attempt + 1,
                }),
            )?;

            let request = NewTask::new(task.task_type.clone(), task.subject.clone())
                .with_params(retry_params)
                .with_request_context(task.request_context.clone());
            match self.manager.start_task(request).await {
                Ok(handle) => {
                    info!(
                        task_id = %task.id,
                        retry_task_id = %handle.id(),
                        task_type = %task.task_type,
                        attempt = attempt + 1,
                        "🔁 SUPERVISOR: Re-created failed task"
                    );
                    retried += 1;
                }
                Err(e) => {
                    warn!(
                        task_id = %task.id,
                        task_type = %task.task_type,
                        error = %e,
                        "⚠️ SUPERVISOR: Failed to re-create task"
                    );
                }
            }
        }
        Ok(retried)
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        Ok(SweepReport {
            stale_failed: self.sweep_stale_tasks().await?,
            retried: self.sweep_failed_tasks().await?,
        })
    }

    /// Run both sweeps every `supervision.sweep_interval_seconds`
    pub fn spawn(self) -> SupervisorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.supervision.sweep_interval();
        let join = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "✅ SUPERVISOR: Started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(report) if report != SweepReport::default() => {
                                info!(
                                    stale_failed = report.stale_failed,
                                    retried = report.retried,
                                    "🔎 SUPERVISOR: Sweep finished"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "❌ SUPERVISOR: Sweep failed"),
                        }
                    }
                }
            }
            info!("🛑 SUPERVISOR: Stopped");
        });
        SupervisorHandle { shutdown_tx, join }
    }

    fn is_retry_candidate(&self, task: &Task) -> bool {
        task.status == TaskState::Failed
            && task.parent_id.is_none()
            && self.retry.task_types.iter().any(|t| t == &task.task_type)
            && Self::attempt_of(task) < i64::from(self.retry.max_attempts)
    }

    fn attempt_of(task: &Task) -> i64 {
        task.param_i64(ATTEMPT).unwrap_or(1)
    }
}

/// Running supervisor loop
pub struct SupervisorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub async fn stop(self) {
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "⚠️ SUPERVISOR: Loop terminated abnormally");
        }
    }
}
