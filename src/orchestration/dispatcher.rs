//! # Stage Dispatcher
//!
//! Runs one work item for one task: reloads the row, re-checks terminal state
//! and stage, resolves the handler for `(task type, stage)` and invokes it.
//!
//! Engine-detected failures are turned into `set_stage_failed`:
//!
//! | Situation | Failure reason |
//! |-----------|----------------|
//! | handler returned `Err(e)` | `{e:#}` |
//! | handler panicked | `stage handler panicked: <message>` |
//! | handler returned `Ok` without a transition | `stage produced no transition` |
//! | no handler for the stage | `no handler registered for stage ...` |
//!
//! Resumes with `succeeded == false` are routed to `{stage}Failed` when the
//! task type registers it. Otherwise a failed child's outcome goes to the
//! waiting stage's own handler, which decides whether it is fatal, and any
//! other failed callback fails the task with the callback's reason.

use super::runtime::{StageData, TaskRuntime};
use super::task_manager::TaskManager;
use super::worker_pool::{WorkItem, WorkKind};
use crate::constants::{failed_stage_name, reasons, ON_INIT};
use crate::events::types;
use crate::logging::{log_error, log_stage_operation};
use crate::models::TaskId;
use crate::registry::StageHandler;
use crate::state_machine::{StateMachineError, TaskEvent, TaskState, TaskStateMachine};
use crate::store::StoreError;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

pub(crate) struct StageDispatcher;

impl StageDispatcher {
    pub(crate) async fn execute(manager: &TaskManager, item: WorkItem) {
        let task_id = item.task_id;
        let mut state_machine =
            match TaskStateMachine::load(task_id, manager.store().clone(), manager.actions()).await
            {
                Ok(sm) => sm,
                Err(StateMachineError::Persistence(StoreError::NotFound(_))) => {
                    Self::discard(manager, task_id, item.kind.name(), "task no longer exists");
                    return;
                }
                Err(e) => {
                    error!(
                        task_id = %task_id,
                        kind = item.kind.name(),
                        error = %e,
                        "❌ DISPATCH: Failed to load task, dropping work item"
                    );
                    return;
                }
            };

        if state_machine.task().is_terminal() {
            let status = state_machine.current_state();
            Self::discard(
                manager,
                task_id,
                item.kind.name(),
                &format!("task is already {status}"),
            );
            return;
        }

        match item.kind {
            WorkKind::Run { data } => {
                if state_machine.current_state() == TaskState::Pending {
                    if let Err(e) = state_machine.transition(TaskEvent::Start).await {
                        error!(task_id = %task_id, error = %e, "❌ DISPATCH: Failed to start task");
                        return;
                    }
                }
                let stage = match state_machine.task().stage.as_str() {
                    "" => ON_INIT.to_string(),
                    recorded => recorded.to_string(),
                };
                Self::invoke(manager, state_machine, stage, data).await;
            }
            WorkKind::Resume {
                expected_stage,
                data,
            } => {
                let recorded = state_machine.task().stage.clone();
                if state_machine.current_state() != TaskState::Running || recorded.is_empty() {
                    Self::discard(manager, task_id, "resume", "task has not started yet");
                    return;
                }
                if let Some(expected) = expected_stage {
                    if expected != recorded {
                        Self::discard(
                            manager,
                            task_id,
                            "resume",
                            &format!("callback for stage {expected}, task is at {recorded}"),
                        );
                        return;
                    }
                }
                Self::invoke(manager, state_machine, recorded, data).await;
            }
            WorkKind::ForceFail { reason } => {
                let stage = state_machine.task().stage.clone();
                let mut runtime = TaskRuntime::new(state_machine, manager.clone(), stage);
                Self::fail(&mut runtime, reason).await;
            }
        }
    }

    async fn invoke(
        manager: &TaskManager,
        state_machine: TaskStateMachine,
        stage: String,
        data: StageData,
    ) {
        let task_type = state_machine.task().task_type.clone();
        let task_id = state_machine.task_id();
        let mut runtime = TaskRuntime::new(state_machine, manager.clone(), stage.clone());

        let handlers = match manager.registry().resolve(&task_type) {
            Ok(handlers) => handlers,
            Err(e) => {
                Self::fail(&mut runtime, e.to_string()).await;
                return;
            }
        };

        let (handler_stage, handler): (String, Option<Arc<dyn StageHandler>>) = if data.succeeded {
            (stage.clone(), handlers.get(&stage))
        } else {
            let failed_stage = failed_stage_name(&stage);
            match handlers.get(&failed_stage) {
                Some(handler) => (failed_stage, Some(handler)),
                None if data.child.is_some() => (stage.clone(), handlers.get(&stage)),
                None => {
                    let reason = data
                        .reason()
                        .unwrap_or_else(|| reasons::CALLBACK_FAILED.to_string());
                    Self::fail(&mut runtime, reason).await;
                    return;
                }
            }
        };

        let Some(handler) = handler else {
            Self::fail(
                &mut runtime,
                format!("no handler registered for stage {handler_stage} of task type {task_type}"),
            )
            .await;
            return;
        };

        log_stage_operation(
            "invoked",
            task_id,
            &handler_stage,
            if data.succeeded { "succeeded" } else { "failed" },
            Some(task_type.as_str()),
        );
        manager.event_publisher().publish(
            types::TASK_STAGE_INVOKED,
            Some(task_id),
            json!({
                "task_id": task_id,
                "task_type": task_type,
                "stage": handler_stage,
                "succeeded": data.succeeded,
            }),
        );

        let outcome = AssertUnwindSafe(handler.handle(&mut runtime, data))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                if runtime.last_transition().is_none() {
                    warn!(
                        task_id = %task_id,
                        stage = %handler_stage,
                        "⚠️ DISPATCH: Stage returned without a transition"
                    );
                    Self::fail(&mut runtime, reasons::NO_TRANSITION).await;
                }
            }
            Ok(Err(err)) => {
                let reason = format!("{err:#}");
                if runtime.is_terminal() {
                    warn!(
                        task_id = %task_id,
                        stage = %handler_stage,
                        error = %reason,
                        "⚠️ DISPATCH: Stage errored after terminal transition, ignoring"
                    );
                } else {
                    Self::fail(&mut runtime, reason).await;
                }
            }
            Err(panic) => {
                let reason = format!("{}: {}", reasons::HANDLER_PANICKED, panic_message(&*panic));
                error!(
                    task_id = %task_id,
                    stage = %handler_stage,
                    reason = %reason,
                    "❌ DISPATCH: Stage handler panicked"
                );
                if !runtime.is_terminal() {
                    Self::fail(&mut runtime, reason).await;
                }
            }
        }
    }

    async fn fail(runtime: &mut TaskRuntime, reason: impl Into<String>) {
        let reason = reason.into();
        if let Err(e) = runtime.set_stage_failed(reason.clone()).await {
            let task_id = runtime.task_id().to_string();
            log_error("dispatch", "set_stage_failed", &e.to_string(), Some(task_id.as_str()));
        }
    }

    fn discard(manager: &TaskManager, task_id: TaskId, kind: &str, why: &str) {
        info!(
            task_id = %task_id,
            kind = kind,
            reason = why,
            "🗑️ DISPATCH: Discarding work item"
        );
        manager.event_publisher().publish(
            types::TASK_CALLBACK_DISCARDED,
            Some(task_id),
            json!({ "task_id": task_id, "kind": kind, "reason": why }),
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
