use crate::models::{RequestContext, SubjectRef, Task, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One auditable action on a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsLogEntry {
    pub subject: SubjectRef,
    pub action: String,
    pub success: bool,
    pub notes: String,
    pub user_id: String,
    pub user_name: String,
    pub project_id: String,
    pub domain_id: String,
    pub task_id: Option<TaskId>,
    /// When the operation being logged began
    pub start_time: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

impl OpsLogEntry {
    pub fn new(
        subject: SubjectRef,
        action: impl Into<String>,
        notes: impl Into<String>,
        ctx: &RequestContext,
        success: bool,
    ) -> Self {
        Self {
            subject,
            action: action.into(),
            success,
            notes: notes.into(),
            user_id: ctx.user_id.clone(),
            user_name: ctx.user_name.clone(),
            project_id: ctx.project_id.clone(),
            domain_id: ctx.domain_id.clone(),
            task_id: None,
            start_time: None,
            recorded_at: Utc::now(),
        }
    }

    /// Entry attributed to `task`, with the task's creation as start time.
    pub fn for_task(
        task: &Task,
        action: impl Into<String>,
        notes: impl Into<String>,
        success: bool,
    ) -> Self {
        let mut entry = Self::new(
            task.subject.clone(),
            action,
            notes,
            &task.request_context,
            success,
        );
        entry.task_id = Some(task.id);
        entry.start_time = Some(task.created_at);
        entry
    }
}

/// Sink for ops-log entries
pub trait OpsLog: Send + Sync {
    fn log_event(&self, entry: OpsLogEntry);
}

/// Writes entries to the `taskman::ops_log` tracing target
#[derive(Debug, Default, Clone)]
pub struct TracingOpsLog;

impl OpsLog for TracingOpsLog {
    fn log_event(&self, entry: OpsLogEntry) {
        if entry.success {
            info!(
                target: "taskman::ops_log",
                subject = %entry.subject,
                subject_name = entry.subject.display_name(),
                action = %entry.action,
                user_id = %entry.user_id,
                project_id = %entry.project_id,
                task_id = ?entry.task_id,
                notes = %entry.notes,
                "📝 OPS_LOG: {}",
                entry.action
            );
        } else {
            warn!(
                target: "taskman::ops_log",
                subject = %entry.subject,
                subject_name = entry.subject.display_name(),
                action = %entry.action,
                user_id = %entry.user_id,
                project_id = %entry.project_id,
                task_id = ?entry.task_id,
                notes = %entry.notes,
                "📝 OPS_LOG: {} failed",
                entry.action
            );
        }
    }
}

/// Discards every entry; used when `audit.ops_log_enabled` is off
#[derive(Debug, Default, Clone)]
pub struct NoopOpsLog;

impl OpsLog for NoopOpsLog {
    fn log_event(&self, _entry: OpsLogEntry) {}
}

/// Bounded queue in front of a slower ops-log backend
///
/// A single background task drains the queue into `inner` in submission order.
pub struct BufferedOpsLog {
    sender: mpsc::Sender<OpsLogEntry>,
}

impl BufferedOpsLog {
    /// Spawn the drain task on the current Tokio runtime.
    pub fn spawn(inner: Arc<dyn OpsLog>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<OpsLogEntry>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                inner.log_event(entry);
            }
            debug!("🛑 OPS_LOG: buffered ops log drained and closed");
        });
        Self { sender }
    }
}

impl OpsLog for BufferedOpsLog {
    fn log_event(&self, entry: OpsLogEntry) {
        if let Err(e) = self.sender.try_send(entry) {
            let entry = match e {
                mpsc::error::TrySendError::Full(entry) | mpsc::error::TrySendError::Closed(entry) => {
                    entry
                }
            };
            warn!(
                subject = %entry.subject,
                action = %entry.action,
                task_id = ?entry.task_id,
                "⚠️ OPS_LOG: buffer unavailable, dropping entry"
            );
        }
    }
}
