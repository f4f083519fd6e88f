//! Per-task serialization, ordering and backpressure of the worker pool.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CompleteHandler, TestEngine, WaitHandler, WAIT};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskman_core::config::{EngineConfig, OverflowPolicy};
use taskman_core::constants::ON_INIT;
use taskman_core::models::{NewTask, SubjectRef, Task, TaskId};
use taskman_core::orchestration::{StageData, TaskManager, TaskRuntime};
use taskman_core::registry::{HandlerSet, StageHandler};
use taskman_core::state_machine::TaskState;
use taskman_core::store::{InMemoryTaskStore, StoreResult, TaskStore};
use taskman_core::test_helpers::wait_for_task;
use taskman_core::TaskmanError;
use tokio::sync::{Barrier, Semaphore};

/// Records every `seq` it is resumed with and stays at `OnTick`
#[derive(Default)]
struct TickHandler {
    seen: Arc<Mutex<Vec<i64>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl StageHandler for TickHandler {
    async fn handle(&self, task: &mut TaskRuntime, data: StageData) -> anyhow::Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(seq) = data.get("seq").and_then(|v| v.as_i64()) {
            self.seen.lock().push(seq);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        task.set_stage("OnTick", None).await?;
        Ok(())
    }
}

/// Meets a second task at a barrier before completing
struct RendezvousHandler {
    barrier: Arc<Barrier>,
}

#[async_trait]
impl StageHandler for RendezvousHandler {
    async fn handle(&self, task: &mut TaskRuntime, _data: StageData) -> anyhow::Result<()> {
        match tokio::time::timeout(Duration::from_secs(2), self.barrier.wait()).await {
            Ok(_) => task.set_stage_complete(None).await?,
            Err(_) => task.set_stage_failed("no concurrent peer").await?,
        }
        Ok(())
    }
}

/// Holds its worker until the gate hands out a permit
struct GateHandler {
    gate: Arc<Semaphore>,
    entered: Arc<AtomicUsize>,
}

#[async_trait]
impl StageHandler for GateHandler {
    async fn handle(&self, task: &mut TaskRuntime, _data: StageData) -> anyhow::Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        task.set_stage_complete(None).await?;
        Ok(())
    }
}

/// Yields between reading a row and returning it, so two callers can hold the
/// same snapshot before either writes
#[derive(Default)]
struct YieldingStore {
    inner: InMemoryTaskStore,
}

#[async_trait]
impl TaskStore for YieldingStore {
    async fn insert(&self, task: &Task) -> StoreResult<()> {
        self.inner.insert(task).await
    }

    async fn load(&self, id: TaskId) -> StoreResult<Task> {
        let task = self.inner.load(id).await;
        tokio::task::yield_now().await;
        task
    }

    async fn update_stage(&self, id: TaskId, stage: &str, params: &Value) -> StoreResult<()> {
        self.inner.update_stage(id, stage, params).await
    }

    async fn update_status(
        &self,
        id: TaskId,
        from: TaskState,
        to: TaskState,
        reason: Option<&str>,
        result: Option<&Value>,
    ) -> StoreResult<()> {
        self.inner.update_status(id, from, to, reason, result).await
    }

    async fn find_by_parent(&self, parent_id: TaskId) -> StoreResult<Vec<Task>> {
        self.inner.find_by_parent(parent_id).await
    }

    async fn find_by_status(
        &self,
        status: TaskState,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Task>> {
        self.inner.find_by_status(status, updated_before).await
    }

    async fn find_created_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        self.inner.find_created_since(since).await
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn register_ticker(engine: &TestEngine) -> TickHandler {
    let tick = TickHandler::default();
    let shared = TickHandler {
        seen: tick.seen.clone(),
        in_flight: tick.in_flight.clone(),
        max_in_flight: tick.max_in_flight.clone(),
    };
    engine
        .manager
        .register_task_type(
            "TickTask",
            HandlerSet::new()
                .stage(ON_INIT, WaitHandler::new("OnTick"))
                .stage("OnTick", shared),
        )
        .unwrap();
    tick
}

fn register_gate(engine: &TestEngine) -> (Arc<Semaphore>, Arc<AtomicUsize>) {
    let gate = Arc::new(Semaphore::new(0));
    let entered = Arc::new(AtomicUsize::new(0));
    engine
        .manager
        .register_task_type(
            "GateTask",
            HandlerSet::new().stage(
                ON_INIT,
                GateHandler {
                    gate: gate.clone(),
                    entered: entered.clone(),
                },
            ),
        )
        .unwrap();
    (gate, entered)
}

fn single_slot(policy: OverflowPolicy) -> EngineConfig {
    EngineConfig {
        worker_count: 1,
        queue_depth: 1,
        overflow_policy: policy,
        ..EngineConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invocations_of_one_task_never_overlap() {
    let engine = TestEngine::new();
    let tick = register_ticker(&engine);

    let handle = engine
        .manager
        .start_task(NewTask::new("TickTask", SubjectRef::new("disk", "d-1")))
        .await
        .unwrap();
    wait_for_task(&engine.manager, handle.id(), |t| t.stage == "OnTick", WAIT)
        .await
        .unwrap();

    let submissions = (0..10).map(|seq| {
        let manager = engine.manager.clone();
        let task_id = handle.id();
        tokio::spawn(async move { manager.resume(task_id, json!({ "seq": seq }), true).await })
    });
    for submission in futures::future::join_all(submissions).await {
        submission.unwrap().unwrap();
    }

    let seen = tick.seen.clone();
    wait_until(|| seen.lock().len() == 10).await;
    assert_eq!(tick.max_in_flight.load(Ordering::SeqCst), 1);

    let mut sorted = tick.seen.lock().clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..10).collect::<Vec<i64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resumes_run_in_submission_order() {
    let engine = TestEngine::new();
    let tick = register_ticker(&engine);

    let handle = engine
        .manager
        .start_task(NewTask::new("TickTask", SubjectRef::new("disk", "d-1")))
        .await
        .unwrap();
    wait_for_task(&engine.manager, handle.id(), |t| t.stage == "OnTick", WAIT)
        .await
        .unwrap();

    for seq in 0..20 {
        engine
            .manager
            .notify_task_callback(handle.id(), "OnTick", true, json!({ "seq": seq }))
            .await
            .unwrap();
    }

    let seen = tick.seen.clone();
    wait_until(|| seen.lock().len() == 20).await;
    assert_eq!(*tick.seen.lock(), (0..20).collect::<Vec<i64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_tasks_run_in_parallel() {
    let engine = TestEngine::new();
    engine
        .manager
        .register_task_type(
            "RendezvousTask",
            HandlerSet::new().stage(
                ON_INIT,
                RendezvousHandler {
                    barrier: Arc::new(Barrier::new(2)),
                },
            ),
        )
        .unwrap();

    let first = engine
        .manager
        .start_task(NewTask::new("RendezvousTask", SubjectRef::new("disk", "d-1")))
        .await
        .unwrap();
    let second = engine
        .manager
        .start_task(NewTask::new("RendezvousTask", SubjectRef::new("disk", "d-2")))
        .await
        .unwrap();

    assert_eq!(first.wait(WAIT).await.unwrap().status, TaskState::Complete);
    assert_eq!(second.wait(WAIT).await.unwrap().status, TaskState::Complete);
}

#[tokio::test]
async fn test_reject_policy_leaves_task_pending() {
    let engine = TestEngine::with_engine_config(single_slot(OverflowPolicy::Reject));
    let (gate, entered) = register_gate(&engine);

    let busy = engine
        .manager
        .start_task(NewTask::new("GateTask", SubjectRef::new("disk", "d-1")))
        .await
        .unwrap();
    let started = entered.clone();
    wait_until(|| started.load(Ordering::SeqCst) == 1).await;

    let waiting = engine
        .manager
        .new_task(NewTask::new("GateTask", SubjectRef::new("disk", "d-2")))
        .await
        .unwrap();
    let err = waiting.schedule_run(None).await.unwrap_err();
    assert_eq!(err, TaskmanError::QueueFull(1));
    assert_eq!(
        engine.manager.get_task(waiting.id()).await.unwrap().status,
        TaskState::Pending
    );

    gate.add_permits(1);
    assert_eq!(busy.wait(WAIT).await.unwrap().status, TaskState::Complete);

    // the slot is released once the first item finishes
    let retry_deadline = tokio::time::Instant::now() + WAIT;
    loop {
        match waiting.schedule_run(None).await {
            Ok(()) => break,
            Err(TaskmanError::QueueFull(_)) if tokio::time::Instant::now() < retry_deadline => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    gate.add_permits(1);
    assert_eq!(waiting.wait(WAIT).await.unwrap().status, TaskState::Complete);
}

#[tokio::test]
async fn test_block_policy_waits_for_a_slot() {
    let engine = TestEngine::with_engine_config(single_slot(OverflowPolicy::Block));
    let (gate, entered) = register_gate(&engine);

    let busy = engine
        .manager
        .start_task(NewTask::new("GateTask", SubjectRef::new("disk", "d-1")))
        .await
        .unwrap();
    let started = entered.clone();
    wait_until(|| started.load(Ordering::SeqCst) == 1).await;

    let waiting = engine
        .manager
        .new_task(NewTask::new("GateTask", SubjectRef::new("disk", "d-2")))
        .await
        .unwrap();
    let blocked = {
        let waiting = waiting.clone();
        tokio::spawn(async move { waiting.schedule_run(None).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());
    assert_eq!(
        engine.manager.get_task(waiting.id()).await.unwrap().status,
        TaskState::Pending
    );

    gate.add_permits(2);
    blocked.await.unwrap().unwrap();
    assert_eq!(busy.wait(WAIT).await.unwrap().status, TaskState::Complete);
    assert_eq!(waiting.wait(WAIT).await.unwrap().status, TaskState::Complete);
}

#[tokio::test]
async fn test_submissions_after_shutdown_are_refused() {
    let engine = TestEngine::new();
    engine
        .manager
        .register_task_type(
            "OneShotTask",
            HandlerSet::new().stage(ON_INIT, CompleteHandler::default()),
        )
        .unwrap();

    engine.manager.shutdown().await;

    let err = engine
        .manager
        .start_task(NewTask::new("OneShotTask", SubjectRef::new("disk", "d-1")))
        .await
        .unwrap_err();
    assert_eq!(err, TaskmanError::ShutDown);
}

#[tokio::test]
async fn test_concurrent_schedule_run_starts_task_once() {
    let manager = TaskManager::builder()
        .store(Arc::new(YieldingStore::default()))
        .build()
        .unwrap();
    let on_init = WaitHandler::new("OnRemote");
    let init_calls = on_init.calls.clone();
    let on_remote = CompleteHandler::default();
    let remote_calls = on_remote.calls.clone();
    manager
        .register_task_type(
            "WaitTask",
            HandlerSet::new()
                .stage(ON_INIT, on_init)
                .stage("OnRemote", on_remote),
        )
        .unwrap();

    let handle = manager
        .new_task(NewTask::new("WaitTask", SubjectRef::new("disk", "d-1")))
        .await
        .unwrap();
    let (first, second) = tokio::join!(
        manager.schedule_run(handle.id(), None),
        manager.schedule_run(handle.id(), None)
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(TaskmanError::StateTransitionError(_)))));

    let task = wait_for_task(&manager, handle.id(), |t| t.stage == "OnRemote", WAIT)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote_calls.load(Ordering::SeqCst), 0);
    assert_eq!(task.status, TaskState::Running);
    assert_eq!(
        manager.get_task(handle.id()).await.unwrap().status,
        TaskState::Running
    );
}
