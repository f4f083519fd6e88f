//! # Task Type Registry
//!
//! Explicit `task type -> stage name -> handler` dispatch table.
//!
//! Each task type registers one [`HandlerSet`] at startup. A handler set maps
//! stage names to [`StageHandler`]s and must contain `OnInit`. One struct can
//! serve many stages through [`MethodHandler`], which binds a shared target to a
//! method pointer:
//!
//! ```rust,ignore
//! let set = HandlerSet::for_target(Arc::new(DiskDeleteTask::new(repo, drivers)))
//!     .on_init(DiskDeleteTask::on_init)
//!     .stage("OnDeallocateComplete", DiskDeleteTask::on_deallocate_complete)
//!     .build();
//! manager.register_task_type("DiskDeleteTask", set)?;
//! ```

use crate::constants::ON_INIT;
use crate::error::{Result, TaskmanError};
use crate::orchestration::runtime::{StageData, TaskRuntime};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Future returned by method-style stage handlers
pub type StageFuture<'a> = BoxFuture<'a, anyhow::Result<()>>;

/// Method pointer shape accepted by [`MethodHandler`]
pub type StageMethod<T> = for<'a> fn(&'a T, &'a mut TaskRuntime, StageData) -> StageFuture<'a>;

/// One continuation of a task type
///
/// The handler reads the task through `task`, does its work and ends with
/// exactly one of `set_stage`, `set_stage_complete` or `set_stage_failed`.
/// Returning `Err` or returning without a transition fails the task.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, task: &mut TaskRuntime, data: StageData) -> anyhow::Result<()>;
}

/// Binds a shared target to one of its stage methods
pub struct MethodHandler<T> {
    target: Arc<T>,
    method: StageMethod<T>,
}

impl<T> MethodHandler<T> {
    pub fn new(target: Arc<T>, method: StageMethod<T>) -> Self {
        Self { target, method }
    }
}

#[async_trait]
impl<T> StageHandler for MethodHandler<T>
where
    T: Send + Sync + 'static,
{
    async fn handle(&self, task: &mut TaskRuntime, data: StageData) -> anyhow::Result<()> {
        (self.method)(self.target.as_ref(), task, data).await
    }
}

/// Stage handlers of one task type
#[derive(Clone, Default)]
pub struct HandlerSet {
    stages: HashMap<String, Arc<dyn StageHandler>>,
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the handler for `name`
    pub fn stage(self, name: impl Into<String>, handler: impl StageHandler + 'static) -> Self {
        self.stage_arc(name, Arc::new(handler))
    }

    pub fn stage_arc(mut self, name: impl Into<String>, handler: Arc<dyn StageHandler>) -> Self {
        self.stages.insert(name.into(), handler);
        self
    }

    /// Start a set whose stages are methods of `target`
    pub fn for_target<T: Send + Sync + 'static>(target: Arc<T>) -> MethodStages<T> {
        MethodStages {
            target,
            set: HandlerSet::new(),
        }
    }

    pub fn get(&self, stage: &str) -> Option<Arc<dyn StageHandler>> {
        self.stages.get(stage).cloned()
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.stages.contains_key(stage)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn validate(&self, task_type: &str) -> Result<()> {
        if task_type.trim().is_empty() {
            return Err(TaskmanError::InvalidHandlerSet {
                task_type: task_type.to_string(),
                reason: "task type name must not be empty".to_string(),
            });
        }
        if !self.contains(ON_INIT) {
            return Err(TaskmanError::InvalidHandlerSet {
                task_type: task_type.to_string(),
                reason: format!("missing required {ON_INIT} stage"),
            });
        }
        Ok(())
    }
}

/// Builder returned by [`HandlerSet::for_target`]
pub struct MethodStages<T> {
    target: Arc<T>,
    set: HandlerSet,
}

impl<T: Send + Sync + 'static> MethodStages<T> {
    pub fn on_init(self, method: StageMethod<T>) -> Self {
        self.stage(ON_INIT, method)
    }

    pub fn stage(mut self, name: impl Into<String>, method: StageMethod<T>) -> Self {
        let handler = MethodHandler::new(self.target.clone(), method);
        self.set = self.set.stage(name, handler);
        self
    }

    pub fn build(self) -> HandlerSet {
        self.set
    }
}

/// Process-scoped map of task type name to handler set
#[derive(Debug, Default)]
pub struct TaskTypeRegistry {
    types: RwLock<HashMap<String, Arc<HandlerSet>>>,
}

impl TaskTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handlers` under `task_type`; each name may be registered once
    pub fn register(&self, task_type: &str, handlers: HandlerSet) -> Result<()> {
        handlers.validate(task_type)?;

        let mut types = self.types.write();
        if types.contains_key(task_type) {
            return Err(TaskmanError::DuplicateRegistration(task_type.to_string()));
        }

        info!(
            task_type = task_type,
            stages = ?handlers.stage_names(),
            "✅ REGISTRY: Registered task type"
        );
        types.insert(task_type.to_string(), Arc::new(handlers));
        Ok(())
    }

    pub fn resolve(&self, task_type: &str) -> Result<Arc<HandlerSet>> {
        self.types
            .read()
            .get(task_type)
            .cloned()
            .ok_or_else(|| TaskmanError::UnknownTaskType(task_type.to_string()))
    }

    pub fn is_registered(&self, task_type: &str) -> bool {
        self.types.read().contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StageHandler for Noop {
        async fn handle(&self, task: &mut TaskRuntime, _data: StageData) -> anyhow::Result<()> {
            task.set_stage_complete(None).await?;
            Ok(())
        }
    }

    struct Target;

    impl Target {
        fn on_init<'a>(
            &'a self,
            task: &'a mut TaskRuntime,
            _data: StageData,
        ) -> StageFuture<'a> {
            Box::pin(async move {
                task.set_stage("OnNext", None).await?;
                Ok(())
            })
        }

        fn on_next<'a>(
            &'a self,
            task: &'a mut TaskRuntime,
            _data: StageData,
        ) -> StageFuture<'a> {
            Box::pin(async move {
                task.set_stage_complete(None).await?;
                Ok(())
            })
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = TaskTypeRegistry::new();
        registry
            .register("NoopTask", HandlerSet::new().stage(ON_INIT, Noop))
            .unwrap();

        let set = registry.resolve("NoopTask").unwrap();
        assert!(set.contains(ON_INIT));
        assert!(registry.is_registered("NoopTask"));
        assert_eq!(registry.task_types(), vec!["NoopTask".to_string()]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = TaskTypeRegistry::new();
        registry
            .register("NoopTask", HandlerSet::new().stage(ON_INIT, Noop))
            .unwrap();
        let err = registry
            .register("NoopTask", HandlerSet::new().stage(ON_INIT, Noop))
            .unwrap_err();
        assert_eq!(err, TaskmanError::DuplicateRegistration("NoopTask".into()));
    }

    #[test]
    fn test_missing_on_init_rejected() {
        let registry = TaskTypeRegistry::new();
        let err = registry
            .register("Broken", HandlerSet::new().stage("OnOther", Noop))
            .unwrap_err();
        assert!(matches!(err, TaskmanError::InvalidHandlerSet { .. }));
        assert!(matches!(
            registry.resolve("Broken"),
            Err(TaskmanError::UnknownTaskType(_))
        ));
    }

    #[test]
    fn test_method_stages_build() {
        let set = HandlerSet::for_target(Arc::new(Target))
            .on_init(Target::on_init)
            .stage("OnNext", Target::on_next)
            .build();
        assert_eq!(set.stage_names(), vec!["OnInit", "OnNext"]);
    }
}
