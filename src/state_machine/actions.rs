use super::events::TaskEvent;
use super::states::TaskState;
use crate::audit::{FailureNotification, Notifier, OpsLog, OpsLogEntry};
use crate::constants::actions;
use crate::events::{types, EventPublisher};
use crate::models::Task;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::trace;

/// Trait for implementing state transition actions
///
/// Actions run after the transition has been persisted and cannot fail it.
#[async_trait]
pub trait StateAction: Send + Sync {
    /// Execute the action
    async fn execute(
        &self,
        task: &Task,
        from_state: TaskState,
        to_state: TaskState,
        event: &TaskEvent,
    );

    /// Get a description of this action for logging
    fn description(&self) -> &'static str;
}

/// Action to publish lifecycle events when state transitions occur
pub struct PublishTransitionEventAction {
    event_publisher: Arc<EventPublisher>,
}

impl PublishTransitionEventAction {
    pub fn new(event_publisher: Arc<EventPublisher>) -> Self {
        Self { event_publisher }
    }
}

#[async_trait]
impl StateAction for PublishTransitionEventAction {
    async fn execute(
        &self,
        task: &Task,
        from_state: TaskState,
        to_state: TaskState,
        event: &TaskEvent,
    ) {
        let event_name = determine_task_event_name(event);
        let context = build_task_event_context(task, from_state, to_state, event);

        let delivered = self
            .event_publisher
            .publish(event_name, Some(task.id), context);
        trace!(
            task_id = %task.id,
            event_name,
            delivered,
            "📣 STATE_MACHINE: lifecycle event published"
        );
    }

    fn description(&self) -> &'static str {
        "Publish lifecycle event for task transition"
    }
}

/// Action to record every transition in the ops log
pub struct OpsLogAction {
    ops_log: Arc<dyn OpsLog>,
}

impl OpsLogAction {
    pub fn new(ops_log: Arc<dyn OpsLog>) -> Self {
        Self { ops_log }
    }
}

#[async_trait]
impl StateAction for OpsLogAction {
    async fn execute(
        &self,
        task: &Task,
        _from_state: TaskState,
        _to_state: TaskState,
        event: &TaskEvent,
    ) {
        let (action, notes, success) = match event {
            TaskEvent::Start => (actions::TASK_START, task.task_type.clone(), true),
            TaskEvent::Stage { stage, .. } => (actions::TASK_STAGE, stage.clone(), true),
            TaskEvent::Complete(_) => (actions::TASK_COMPLETE, task.task_type.clone(), true),
            TaskEvent::Fail(reason) => (actions::TASK_FAIL, reason.clone(), false),
        };
        self.ops_log
            .log_event(OpsLogEntry::for_task(task, action, notes, success));
    }

    fn description(&self) -> &'static str {
        "Record task transition in the ops log"
    }
}

/// Action to send a system-error notification on terminal failure
pub struct FailureNotificationAction {
    notifier: Arc<dyn Notifier>,
}

impl FailureNotificationAction {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl StateAction for FailureNotificationAction {
    async fn execute(
        &self,
        task: &Task,
        _from_state: TaskState,
        to_state: TaskState,
        event: &TaskEvent,
    ) {
        if to_state != TaskState::Failed {
            return;
        }
        let reason = event.error_message().unwrap_or_default();
        self.notifier.notify_failure(FailureNotification::for_task(
            task,
            task.task_type.clone(),
            reason,
        ));
    }

    fn description(&self) -> &'static str {
        "Notify system error on task failure"
    }
}

/// Ordered set of actions run after every persisted transition
#[derive(Clone, Default)]
pub struct TransitionActions {
    actions: Arc<Vec<Box<dyn StateAction>>>,
}

impl TransitionActions {
    pub fn new(actions: Vec<Box<dyn StateAction>>) -> Self {
        Self {
            actions: Arc::new(actions),
        }
    }

    /// Event publication, ops log and failure notification, in that order.
    pub fn standard(
        event_publisher: Arc<EventPublisher>,
        ops_log: Arc<dyn OpsLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(vec![
            Box::new(PublishTransitionEventAction::new(event_publisher)),
            Box::new(OpsLogAction::new(ops_log)),
            Box::new(FailureNotificationAction::new(notifier)),
        ])
    }

    /// Run every action in order.
    pub async fn run(&self, task: &Task, from: TaskState, to: TaskState, event: &TaskEvent) {
        for action in self.actions.iter() {
            action.execute(task, from, to, event).await;
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn determine_task_event_name(event: &TaskEvent) -> &'static str {
    match event {
        TaskEvent::Start => types::TASK_STARTED,
        TaskEvent::Stage { .. } => types::TASK_STAGE_SET,
        TaskEvent::Complete(_) => types::TASK_COMPLETED,
        TaskEvent::Fail(_) => types::TASK_FAILED,
    }
}

fn build_task_event_context(
    task: &Task,
    from_state: TaskState,
    to_state: TaskState,
    event: &TaskEvent,
) -> Value {
    json!({
        "task_id": task.id,
        "task_type": task.task_type,
        "subject": task.subject,
        "stage": task.stage,
        "from_state": from_state,
        "to_state": to_state,
        "event_type": event.event_type(),
        "reason": event.error_message(),
        "parent_id": task.parent_id,
    })
}
