//! # Task Manager
//!
//! Task type registry, task factory and resumption entry point.
//!
//! One `TaskManager` is built at process start and cloned wherever it is
//! needed; clones share the registry, the store, the audit sinks and the
//! worker pool.
//!
//! ```rust,ignore
//! let manager = TaskManager::builder()
//!     .store(Arc::new(InMemoryTaskStore::new()))
//!     .build()?;
//! manager.register_task_type("DiskDeleteTask", disk_delete_handlers)?;
//!
//! let handle = manager
//!     .start_task(NewTask::new("DiskDeleteTask", SubjectRef::new("disk", disk_id)))
//!     .await?;
//! let task = handle.wait(Duration::from_secs(30)).await?;
//! ```

use super::dispatcher::StageDispatcher;
use super::runtime::StageData;
use super::worker_pool::{Executor, PoolStats, WorkItem, WorkerPool};
use crate::audit::{Notifier, OpsLog, TracingNotifier, TracingOpsLog};
use crate::config::EngineConfig;
use crate::error::{Result, TaskmanError};
use crate::events::{types, EventPublisher, PublishedEvent};
use crate::models::{NewTask, RequestContext, SubjectRef, Task, TaskId};
use crate::registry::{HandlerSet, TaskTypeRegistry};
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine, TransitionActions};
use crate::store::{InMemoryTaskStore, TaskStore};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct ManagerInner {
    registry: TaskTypeRegistry,
    store: Arc<dyn TaskStore>,
    event_publisher: Arc<EventPublisher>,
    ops_log: Arc<dyn OpsLog>,
    notifier: Arc<dyn Notifier>,
    actions: TransitionActions,
    pool: WorkerPool,
    config: EngineConfig,
}

/// Cheaply cloneable handle to the task engine
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("task_types", &self.inner.registry.task_types())
            .field("pool", &self.inner.pool.stats())
            .finish()
    }
}

/// Builder for [`TaskManager`]
#[derive(Default)]
pub struct TaskManagerBuilder {
    store: Option<Arc<dyn TaskStore>>,
    ops_log: Option<Arc<dyn OpsLog>>,
    notifier: Option<Arc<dyn Notifier>>,
    event_publisher: Option<Arc<EventPublisher>>,
    engine_config: EngineConfig,
}

impl TaskManagerBuilder {
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn ops_log(mut self, ops_log: Arc<dyn OpsLog>) -> Self {
        self.ops_log = Some(ops_log);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn event_publisher(mut self, event_publisher: Arc<EventPublisher>) -> Self {
        self.event_publisher = Some(event_publisher);
        self
    }

    pub fn engine_config(mut self, engine_config: EngineConfig) -> Self {
        self.engine_config = engine_config;
        self
    }

    /// Start the worker pool and return the manager
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<TaskManager> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TaskmanError::ConfigurationError(
                "TaskManager must be built inside a Tokio runtime".to_string(),
            ));
        }
        if self.engine_config.worker_count == 0 || self.engine_config.queue_depth == 0 {
            return Err(TaskmanError::ConfigurationError(
                "engine.worker_count and engine.queue_depth must be positive".to_string(),
            ));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let ops_log = self.ops_log.unwrap_or_else(|| Arc::new(TracingOpsLog));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
        let event_publisher = self.event_publisher.unwrap_or_else(|| {
            Arc::new(EventPublisher::new(
                self.engine_config.event_channel_capacity,
            ))
        });
        let actions =
            TransitionActions::standard(event_publisher.clone(), ops_log.clone(), notifier.clone());
        let config = self.engine_config;

        let inner = Arc::new_cyclic(|weak: &Weak<ManagerInner>| {
            let weak = weak.clone();
            let executor: Executor = Arc::new(move |item: WorkItem| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let manager = TaskManager { inner };
                        StageDispatcher::execute(&manager, item).await;
                    }
                }
                .boxed()
            });

            ManagerInner {
                registry: TaskTypeRegistry::new(),
                store,
                event_publisher,
                ops_log,
                notifier,
                actions,
                pool: WorkerPool::start(&config, executor),
                config,
            }
        });

        Ok(TaskManager { inner })
    }
}

impl TaskManager {
    pub fn builder() -> TaskManagerBuilder {
        TaskManagerBuilder::default()
    }

    /// Register the handler set of a task type
    pub fn register_task_type(&self, task_type: &str, handlers: HandlerSet) -> Result<()> {
        self.inner.registry.register(task_type, handlers)
    }

    /// Validate and persist a new `pending` task
    pub async fn new_task(&self, request: NewTask) -> Result<TaskHandle> {
        self.inner.registry.resolve(&request.task_type)?;
        if let Some(parent_id) = request.parent_id {
            self.inner.store.load(parent_id).await?;
        }

        let task = request.into_task()?;
        self.inner.store.insert(&task).await?;

        crate::log_task!(info, "created",
            task_id: task.id,
            task_type: task.task_type,
            subject: task.subject.to_string(),
            parent_id: task.parent_id
        );
        self.inner.event_publisher.publish(
            types::TASK_CREATED,
            Some(task.id),
            json!({
                "task_id": task.id,
                "task_type": task.task_type,
                "subject": task.subject,
                "parent_id": task.parent_id,
            }),
        );

        Ok(TaskHandle {
            task,
            manager: self.clone(),
        })
    }

    /// Positional form of [`new_task`](Self::new_task)
    pub async fn create_task(
        &self,
        task_type: &str,
        subject: SubjectRef,
        params: Value,
        request_context: RequestContext,
        parent_id: Option<TaskId>,
    ) -> Result<TaskHandle> {
        let mut request = NewTask::new(task_type, subject)
            .with_params(params)
            .with_request_context(request_context);
        request.parent_id = parent_id;
        self.new_task(request).await
    }

    /// Create a task and schedule its first run
    pub async fn start_task(&self, request: NewTask) -> Result<TaskHandle> {
        let mut handle = self.new_task(request).await?;
        self.schedule_run(handle.id(), None).await?;
        handle.task.status = TaskState::Running;
        Ok(handle)
    }

    /// Transition `pending -> running` and enqueue the first invocation
    ///
    /// Capacity is reserved first, so a rejected submission leaves the task
    /// `pending`.
    pub async fn schedule_run(&self, task_id: TaskId, initial_data: Option<Value>) -> Result<()> {
        let slot = self.inner.pool.reserve().await?;
        self.start_transition(task_id).await?;
        self.inner.pool.enqueue(
            slot,
            WorkItem::run(task_id, StageData::success(initial_data.unwrap_or(Value::Null))),
        );
        Ok(())
    }

    /// Engine-internal `schedule_run` that never fails on a full queue
    pub(crate) async fn schedule_run_detached(
        &self,
        task_id: TaskId,
        initial_data: Option<Value>,
    ) -> Result<()> {
        self.start_transition(task_id).await?;
        self.inner.pool.submit_detached(WorkItem::run(
            task_id,
            StageData::success(initial_data.unwrap_or(Value::Null)),
        ))
    }

    async fn start_transition(&self, task_id: TaskId) -> Result<()> {
        let mut state_machine =
            TaskStateMachine::load(task_id, self.inner.store.clone(), self.actions()).await?;
        state_machine.transition(TaskEvent::Start).await?;
        Ok(())
    }

    /// Re-enter the recorded stage of `task_id` with callback data
    ///
    /// `TaskNotFound` and `TaskAlreadyTerminal` are returned for late or
    /// duplicate callbacks; see [`TaskmanError::is_benign_callback_error`].
    /// A task that was never scheduled is rejected with `StateTransitionError`.
    pub async fn resume(&self, task_id: TaskId, data: Value, succeeded: bool) -> Result<()> {
        let task = self.ingress_started(task_id, "resume").await?;
        let stage_data = Self::callback_data(data, succeeded);
        let slot = self.inner.pool.reserve().await?;
        debug!(task_id = %task_id, stage = %task.stage, succeeded = succeeded, "📨 TASK: Resume accepted");
        self.inner
            .pool
            .enqueue(slot, WorkItem::resume(task_id, None, stage_data));
        Ok(())
    }

    /// Callback ingress for drivers and remote agents
    ///
    /// Like [`resume`](Self::resume), but a callback addressed to a stage other
    /// than the recorded one is discarded with `StageMismatch`. The stage is
    /// checked again when the invocation runs.
    pub async fn notify_task_callback(
        &self,
        task_id: TaskId,
        stage: &str,
        succeeded: bool,
        data: Value,
    ) -> Result<()> {
        let task = self.ingress_started(task_id, "callback").await?;
        if task.stage != stage {
            self.publish_discarded(task_id, "callback", "stage mismatch");
            return Err(TaskmanError::StageMismatch {
                task_id,
                callback_stage: stage.to_string(),
                recorded_stage: task.stage,
            });
        }
        let stage_data = Self::callback_data(data, succeeded);
        let slot = self.inner.pool.reserve().await?;
        self.inner.pool.enqueue(
            slot,
            WorkItem::resume(task_id, Some(stage.to_string()), stage_data),
        );
        Ok(())
    }

    /// Engine-internal resume used by completion propagation
    pub(crate) fn resume_detached(&self, task_id: TaskId, data: StageData) -> Result<()> {
        self.inner
            .pool
            .submit_detached(WorkItem::resume(task_id, None, data))
    }

    /// Fail a non-terminal task, serialized with its other work items
    pub async fn force_fail(&self, task_id: TaskId, reason: impl Into<String>) -> Result<()> {
        self.ingress_check(task_id, "force_fail").await?;
        self.inner
            .pool
            .submit_detached(WorkItem::force_fail(task_id, reason))
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Task> {
        Ok(self.inner.store.load(task_id).await?)
    }

    pub async fn children_of(&self, task_id: TaskId) -> Result<Vec<Task>> {
        Ok(self.inner.store.find_by_parent(task_id).await?)
    }

    /// Wait until `task_id` is `complete` or `failed`
    pub async fn wait_for_terminal(&self, task_id: TaskId, timeout: Duration) -> Result<Task> {
        let mut events = self.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            let task = self.get_task(task_id).await?;
            if task.is_terminal() {
                return Ok(task);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TaskmanError::Timeout(format!(
                    "task {task_id} still {} at stage '{}' after {timeout:?}",
                    task.status, task.stage
                )));
            }
            let wait = (deadline - now).min(WAIT_POLL_INTERVAL);
            let _ = tokio::time::timeout(wait, Self::next_terminal_event(&mut events, task_id)).await;
        }
    }

    async fn next_terminal_event(events: &mut broadcast::Receiver<PublishedEvent>, task_id: TaskId) {
        loop {
            match events.recv().await {
                Ok(event) if event.is_for(task_id) && types::is_terminal_event(&event.name) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.inner.event_publisher.subscribe()
    }

    pub fn registry(&self) -> &TaskTypeRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    pub fn event_publisher(&self) -> &Arc<EventPublisher> {
        &self.inner.event_publisher
    }

    pub fn ops_log(&self) -> &Arc<dyn OpsLog> {
        &self.inner.ops_log
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.inner.notifier
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub(crate) fn actions(&self) -> TransitionActions {
        self.inner.actions.clone()
    }

    /// Stop the worker pool; running invocations finish, queued ones are dropped
    pub async fn shutdown(&self) {
        info!("🛑 TASK: Task manager shutting down");
        self.inner.pool.shutdown().await;
    }

    async fn ingress_check(&self, task_id: TaskId, kind: &str) -> Result<Task> {
        let task = match self.inner.store.load(task_id).await {
            Ok(task) => task,
            Err(e) => {
                let err = TaskmanError::from(e);
                if err.is_benign_callback_error() {
                    info!(task_id = %task_id, kind = kind, "🗑️ TASK: Callback for unknown task ignored");
                }
                return Err(err);
            }
        };
        if task.is_terminal() {
            info!(
                task_id = %task_id,
                kind = kind,
                status = %task.status,
                "🗑️ TASK: Callback for terminal task ignored"
            );
            self.publish_discarded(task_id, kind, "task is terminal");
            return Err(TaskmanError::TaskAlreadyTerminal {
                task_id,
                status: task.status,
            });
        }
        Ok(task)
    }

    async fn ingress_started(&self, task_id: TaskId, kind: &str) -> Result<Task> {
        let task = self.ingress_check(task_id, kind).await?;
        if task.status == TaskState::Pending {
            info!(task_id = %task_id, kind = kind, "🗑️ TASK: Callback for unscheduled task rejected");
            self.publish_discarded(task_id, kind, "task has not started yet");
            return Err(TaskmanError::StateTransitionError(format!(
                "task {task_id} is pending; schedule_run it before resuming"
            )));
        }
        Ok(task)
    }

    fn callback_data(data: Value, succeeded: bool) -> StageData {
        StageData {
            payload: data,
            succeeded,
            child: None,
        }
    }

    fn publish_discarded(&self, task_id: TaskId, kind: &str, reason: &str) {
        self.inner.event_publisher.publish(
            types::TASK_CALLBACK_DISCARDED,
            Some(task_id),
            json!({ "task_id": task_id, "kind": kind, "reason": reason }),
        );
    }
}

/// Snapshot of a created task plus the manager that owns it
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub(crate) task: Task,
    manager: TaskManager,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.task.id
    }

    /// Task as of creation or the last [`refresh`](Self::refresh)
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    pub async fn schedule_run(&self, initial_data: Option<Value>) -> Result<()> {
        self.manager.schedule_run(self.task.id, initial_data).await
    }

    pub async fn refresh(&mut self) -> Result<&Task> {
        self.task = self.manager.get_task(self.task.id).await?;
        Ok(&self.task)
    }

    pub async fn wait(&self, timeout: Duration) -> Result<Task> {
        self.manager.wait_for_terminal(self.task.id, timeout).await
    }
}
