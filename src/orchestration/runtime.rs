//! # Task Runtime
//!
//! Single-writer execution context handed to a stage handler for the duration
//! of one invocation.
//!
//! The runtime owns the task's state machine, so every transition a handler
//! makes is persisted before the call returns. Terminal transitions also run
//! the parent/child completion propagator.

use super::driver::TaskCallback;
use super::propagator::CompletionPropagator;
use super::task_manager::{TaskHandle, TaskManager};
use crate::audit::OpsLogEntry;
use crate::error::{Result, TaskmanError};
use crate::logging::log_task_operation;
use crate::models::{NewTask, RequestContext, SubjectRef, Task, TaskId};
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// Terminal outcome of a child task, delivered to its waiting parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildOutcome {
    pub task_id: TaskId,
    pub task_type: String,
    pub subject: SubjectRef,
    pub succeeded: bool,
    pub result: Option<Value>,
    pub reason: Option<String>,
}

impl ChildOutcome {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            subject: task.subject.clone(),
            succeeded: task.status == TaskState::Complete,
            result: task.result.clone(),
            reason: task.reason.clone(),
        }
    }
}

/// Input of one stage invocation
#[derive(Debug, Clone, PartialEq)]
pub struct StageData {
    /// Callback payload, or the initial data of the first run
    pub payload: Value,
    /// Whether the operation that triggered this invocation succeeded
    pub succeeded: bool,
    /// Set when this invocation was triggered by a child's terminal transition
    pub child: Option<ChildOutcome>,
}

impl Default for StageData {
    fn default() -> Self {
        Self::success(Value::Null)
    }
}

impl StageData {
    pub fn success(payload: Value) -> Self {
        Self {
            payload,
            succeeded: true,
            child: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            payload: json!({ "reason": reason.into() }),
            succeeded: false,
            child: None,
        }
    }

    pub fn from_child(outcome: ChildOutcome) -> Self {
        let payload = match (&outcome.result, &outcome.reason) {
            (Some(result), _) if outcome.succeeded => result.clone(),
            (_, Some(reason)) => json!({ "reason": reason }),
            _ => Value::Null,
        };
        Self {
            payload,
            succeeded: outcome.succeeded,
            child: Some(outcome),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Failure reason carried by the payload or the child outcome
    pub fn reason(&self) -> Option<String> {
        if let Some(reason) = self.child.as_ref().and_then(|c| c.reason.clone()) {
            return Some(reason);
        }
        match &self.payload {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(map) => map.get("reason").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }
}

/// Last transition a handler made during the current invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageTransition {
    Staged(String),
    Completed,
    Failed(String),
}

/// Execution context for one stage invocation
pub struct TaskRuntime {
    state_machine: TaskStateMachine,
    manager: TaskManager,
    invoked_stage: String,
    transition: Option<StageTransition>,
    started_at: Instant,
}

impl std::fmt::Debug for TaskRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRuntime")
            .field("task_id", &self.task_id())
            .field("invoked_stage", &self.invoked_stage)
            .field("transition", &self.transition)
            .finish()
    }
}

impl TaskRuntime {
    pub(crate) fn new(
        state_machine: TaskStateMachine,
        manager: TaskManager,
        invoked_stage: impl Into<String>,
    ) -> Self {
        Self {
            state_machine,
            manager,
            invoked_stage: invoked_stage.into(),
            transition: None,
            started_at: Instant::now(),
        }
    }

    pub fn task(&self) -> &Task {
        self.state_machine.task()
    }

    pub fn task_id(&self) -> TaskId {
        self.state_machine.task_id()
    }

    pub fn task_type(&self) -> &str {
        &self.task().task_type
    }

    pub fn subject(&self) -> &SubjectRef {
        &self.task().subject
    }

    pub fn params(&self) -> &Value {
        &self.task().params
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.task().param_str(key)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.task().param_i64(key)
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.task().param_bool(key, default)
    }

    pub fn request_context(&self) -> &RequestContext {
        &self.task().request_context
    }

    pub fn parent_id(&self) -> Option<TaskId> {
        self.task().parent_id
    }

    /// Stage currently recorded on the task
    pub fn stage(&self) -> &str {
        &self.task().stage
    }

    /// Stage whose handler is running
    pub fn invoked_stage(&self) -> &str {
        &self.invoked_stage
    }

    pub fn status(&self) -> TaskState {
        self.state_machine.current_state()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn last_transition(&self) -> Option<&StageTransition> {
        self.transition.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    /// Record `name` as the next continuation and merge `data` into params
    ///
    /// Does not invoke the continuation; a callback (or an inline call by the
    /// handler itself) does.
    pub async fn set_stage(&mut self, name: &str, data: Option<Value>) -> Result<()> {
        self.state_machine
            .transition(TaskEvent::stage(name, data))
            .await?;
        self.transition = Some(StageTransition::Staged(name.to_string()));
        Ok(())
    }

    /// Complete the task and notify a waiting parent
    pub async fn set_stage_complete(&mut self, result: Option<Value>) -> Result<()> {
        self.state_machine
            .transition(TaskEvent::Complete(result))
            .await?;
        self.transition = Some(StageTransition::Completed);
        log_task_operation(
            "completed",
            Some(self.task_id()),
            Some(self.task_type()),
            TaskState::Complete.as_str(),
            None,
        );
        CompletionPropagator::propagate(&self.manager, self.state_machine.task()).await;
        Ok(())
    }

    /// Fail the task with `reason` and notify a waiting parent
    pub async fn set_stage_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.state_machine
            .transition(TaskEvent::Fail(reason.clone()))
            .await?;
        log_task_operation(
            "failed",
            Some(self.task_id()),
            Some(self.task_type()),
            TaskState::Failed.as_str(),
            Some(reason.as_str()),
        );
        self.transition = Some(StageTransition::Failed(reason));
        CompletionPropagator::propagate(&self.manager, self.state_machine.task()).await;
        Ok(())
    }

    /// Callback bound to this task and its currently recorded stage
    ///
    /// Call after `set_stage` so the callback resumes the new stage.
    pub fn callback(&self) -> TaskCallback {
        TaskCallback::new(self.task_id(), self.stage(), self.manager.clone())
    }

    /// Create a pending child of this task
    ///
    /// The child inherits this task's request context unless `request` carries
    /// its own.
    pub async fn new_subtask(&self, request: NewTask) -> Result<TaskHandle> {
        if self.is_terminal() {
            return Err(TaskmanError::TaskAlreadyTerminal {
                task_id: self.task_id(),
                status: self.status(),
            });
        }
        let mut request = request.with_parent(self.task_id());
        if request.request_context.user_id.is_empty() {
            request.request_context = self.request_context().clone();
        }
        self.manager.new_task(request).await
    }

    /// Create a child and schedule its first run
    pub async fn start_subtask(&self, request: NewTask) -> Result<TaskHandle> {
        let handle = self.new_subtask(request).await?;
        self.manager
            .schedule_run_detached(handle.id(), None)
            .await?;
        Ok(handle)
    }

    /// Schedule the first run of a child created earlier with `new_subtask`
    pub async fn schedule_subtask(&self, child_id: TaskId) -> Result<()> {
        self.manager.schedule_run_detached(child_id, None).await
    }

    /// Write a business ops-log entry attributed to this task
    pub fn log_event(&self, action: &str, notes: impl Into<String>, success: bool) {
        self.manager
            .ops_log()
            .log_event(OpsLogEntry::for_task(self.task(), action, notes, success));
    }
}
