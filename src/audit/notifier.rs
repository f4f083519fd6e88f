use crate::models::{SubjectRef, Task, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// System-error notification sent when a task fails terminally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotification {
    pub subject: SubjectRef,
    pub task_type: String,
    pub action: String,
    pub reason: String,
    pub owner_project_id: String,
    pub task_id: TaskId,
    pub occurred_at: DateTime<Utc>,
}

impl FailureNotification {
    pub fn for_task(task: &Task, action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subject: task.subject.clone(),
            task_type: task.task_type.clone(),
            action: action.into(),
            reason: reason.into(),
            owner_project_id: task.request_context.project_id.clone(),
            task_id: task.id,
            occurred_at: Utc::now(),
        }
    }
}

/// Sink for failure notifications
pub trait Notifier: Send + Sync {
    fn notify_failure(&self, notification: FailureNotification);
}

/// Reports failures at error level on the `taskman::notify` target
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_failure(&self, notification: FailureNotification) {
        error!(
            target: "taskman::notify",
            task_id = %notification.task_id,
            task_type = %notification.task_type,
            subject = %notification.subject,
            action = %notification.action,
            owner_project_id = %notification.owner_project_id,
            reason = %notification.reason,
            "🚨 NOTIFY: {} failed on {}",
            notification.action,
            notification.subject
        );
    }
}
