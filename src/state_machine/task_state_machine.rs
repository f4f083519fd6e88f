use super::{
    actions::TransitionActions,
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    states::TaskState,
};
use crate::models::{merge_params, Task, TaskId};
use crate::store::{StoreError, TaskStore};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Task state machine: persists a transition, then runs its actions
///
/// Owned by exactly one stage invocation at a time; the worker pool guarantees
/// no two machines for the same task id are live concurrently. Status writes
/// are conditional on the status this machine loaded, so a machine holding a
/// stale snapshot gets `InvalidTransition` instead of overwriting.
pub struct TaskStateMachine {
    task: Task,
    store: Arc<dyn TaskStore>,
    actions: TransitionActions,
}

impl fmt::Debug for TaskStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStateMachine")
            .field("task_id", &self.task.id)
            .field("status", &self.task.status)
            .field("stage", &self.task.stage)
            .field("actions", &self.actions.len())
            .finish()
    }
}

impl TaskStateMachine {
    pub fn new(task: Task, store: Arc<dyn TaskStore>, actions: TransitionActions) -> Self {
        Self {
            task,
            store,
            actions,
        }
    }

    /// Load the task row and wrap it in a state machine
    pub async fn load(
        task_id: TaskId,
        store: Arc<dyn TaskStore>,
        actions: TransitionActions,
    ) -> StateMachineResult<Self> {
        let task = store.load(task_id).await?;
        Ok(Self::new(task, store, actions))
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    pub fn current_state(&self) -> TaskState {
        self.task.status
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    /// Attempt to transition the task, returning the new state
    pub async fn transition(&mut self, event: TaskEvent) -> StateMachineResult<TaskState> {
        let current_state = self.task.status;
        if current_state.is_terminal() {
            return Err(StateMachineError::AlreadyTerminal {
                task_id: self.task.id,
                state: current_state,
            });
        }
        let target_state = Self::determine_target_state(current_state, &event)?;

        self.persist(current_state, &event)
            .await
            .map_err(|err| Self::conflict_error(err, &event))?;

        self.task.status = target_state;
        self.task.updated_at = Utc::now();

        debug!(
            task_id = %self.task.id,
            from_state = %current_state,
            to_state = %target_state,
            event = event.event_type(),
            stage = %self.task.stage,
            "🔄 STATE_MACHINE: transition persisted"
        );

        self.actions
            .run(&self.task, current_state, target_state, &event)
            .await;

        Ok(target_state)
    }

    async fn persist(
        &mut self,
        current_state: TaskState,
        event: &TaskEvent,
    ) -> StateMachineResult<()> {
        match event {
            TaskEvent::Start => {
                self.store
                    .update_status(self.task.id, current_state, TaskState::Running, None, None)
                    .await?;
            }
            TaskEvent::Stage { stage, data } => {
                let mut params = self.task.params.clone();
                if let Some(data) = data {
                    merge_params(&mut params, data.clone())
                        .map_err(|e| StateMachineError::Validation(e.to_string()))?;
                }
                self.store
                    .update_stage(self.task.id, stage, &params)
                    .await?;
                self.task.params = params;
                self.task.stage = stage.clone();
            }
            TaskEvent::Complete(result) => {
                self.store
                    .update_status(
                        self.task.id,
                        current_state,
                        TaskState::Complete,
                        None,
                        result.as_ref(),
                    )
                    .await?;
                self.task.result = result.clone();
            }
            TaskEvent::Fail(reason) => {
                self.store
                    .update_status(
                        self.task.id,
                        current_state,
                        TaskState::Failed,
                        Some(reason),
                        None,
                    )
                    .await?;
                self.task.reason = Some(reason.clone());
            }
        }
        Ok(())
    }

    /// A status write that lost its compare-and-set means this snapshot is stale
    fn conflict_error(err: StateMachineError, event: &TaskEvent) -> StateMachineError {
        match err {
            StateMachineError::Persistence(StoreError::StatusConflict { id, actual, .. })
                if actual.is_terminal() =>
            {
                StateMachineError::AlreadyTerminal {
                    task_id: id,
                    state: actual,
                }
            }
            StateMachineError::Persistence(StoreError::StatusConflict { actual, .. }) => {
                StateMachineError::InvalidTransition {
                    from: actual,
                    event: event.event_type().to_string(),
                }
            }
            other => other,
        }
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: TaskState,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskState> {
        let target = match (current_state, event) {
            (TaskState::Pending, TaskEvent::Start) => TaskState::Running,
            (TaskState::Running, TaskEvent::Stage { .. }) => TaskState::Running,
            (TaskState::Running, TaskEvent::Complete(_)) => TaskState::Complete,
            (TaskState::Pending | TaskState::Running, TaskEvent::Fail(_)) => TaskState::Failed,
            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }
}
