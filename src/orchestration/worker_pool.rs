//! # Worker Pool
//!
//! Bounded pool of Tokio workers with a FIFO mailbox per task id.
//!
//! ## Ordering
//!
//! A task id is handed to at most one worker at a time. While an id is being
//! processed its mailbox entry stays in the map, so new arrivals queue behind it
//! without signalling; when the worker finishes it re-signals the id if more
//! items are waiting. Items for one id therefore execute strictly in
//! submission order, and different ids run in parallel.
//!
//! ## Capacity
//!
//! A semaphore with `queue_depth` permits bounds queued plus in-flight items.
//! The permit is taken before enqueue and released when the item finishes.

use super::runtime::StageData;
use crate::config::{EngineConfig, OverflowPolicy};
use crate::error::{Result, TaskmanError};
use crate::models::TaskId;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a worker should do with a task
#[derive(Debug, Clone)]
pub enum WorkKind {
    /// First run, or re-entry of the recorded stage after a restart
    Run { data: StageData },
    /// Callback or child completion; `expected_stage` is re-checked under serialization
    Resume {
        expected_stage: Option<String>,
        data: StageData,
    },
    /// Engine-initiated failure
    ForceFail { reason: String },
}

impl WorkKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Resume { .. } => "resume",
            Self::ForceFail { .. } => "force_fail",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub task_id: TaskId,
    pub kind: WorkKind,
}

impl WorkItem {
    pub fn run(task_id: TaskId, data: StageData) -> Self {
        Self {
            task_id,
            kind: WorkKind::Run { data },
        }
    }

    pub fn resume(task_id: TaskId, expected_stage: Option<String>, data: StageData) -> Self {
        Self {
            task_id,
            kind: WorkKind::Resume {
                expected_stage,
                data,
            },
        }
    }

    pub fn force_fail(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            kind: WorkKind::ForceFail {
                reason: reason.into(),
            },
        }
    }
}

/// Executes one work item; supplied by the task manager
pub type Executor = Arc<dyn Fn(WorkItem) -> BoxFuture<'static, ()> + Send + Sync>;

/// Reserved capacity for one work item
#[derive(Debug)]
pub struct QueueSlot {
    permit: OwnedSemaphorePermit,
}

struct QueuedItem {
    item: WorkItem,
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub worker_count: usize,
    pub queue_depth: usize,
    pub available_slots: usize,
    pub active_task_ids: usize,
    pub completed_items: u64,
}

struct PoolShared {
    mailboxes: Mutex<HashMap<TaskId, VecDeque<QueuedItem>>>,
    ready_tx: mpsc::UnboundedSender<TaskId>,
    ready_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskId>>,
    permits: Arc<Semaphore>,
    queue_depth: usize,
    overflow_policy: OverflowPolicy,
    shutdown_tx: watch::Sender<bool>,
    executor: Executor,
    completed: AtomicU64,
}

impl PoolShared {
    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn enqueue(&self, slot: QueueSlot, item: WorkItem) {
        let task_id = item.task_id;
        let queued = QueuedItem {
            item,
            _permit: slot.permit,
        };
        let mut mailboxes = self.mailboxes.lock();
        match mailboxes.get_mut(&task_id) {
            Some(queue) => queue.push_back(queued),
            None => {
                mailboxes.insert(task_id, VecDeque::from([queued]));
                if self.ready_tx.send(task_id).is_err() {
                    mailboxes.remove(&task_id);
                    warn!(task_id = %task_id, "⚠️ POOL: ready channel closed, dropping work item");
                }
            }
        }
    }

    /// Pop the next item for `task_id`, leaving the entry in place as an in-flight marker
    fn take_next(&self, task_id: TaskId) -> Option<QueuedItem> {
        let mut mailboxes = self.mailboxes.lock();
        let next = mailboxes.get_mut(&task_id).and_then(VecDeque::pop_front);
        if next.is_none() {
            mailboxes.remove(&task_id);
        }
        next
    }

    /// Release the in-flight marker, re-signalling if more items arrived
    fn finish(&self, task_id: TaskId) {
        let mut mailboxes = self.mailboxes.lock();
        let has_more = mailboxes
            .get(&task_id)
            .map(|queue| !queue.is_empty())
            .unwrap_or(false);
        if has_more {
            if self.ready_tx.send(task_id).is_err() {
                mailboxes.remove(&task_id);
            }
        } else {
            mailboxes.remove(&task_id);
        }
    }
}

/// Bounded pool executing work items with per-task-id serialization
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `config.worker_count` workers on the current Tokio runtime
    pub fn start(config: &EngineConfig, executor: Executor) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let shared = Arc::new(PoolShared {
            mailboxes: Mutex::new(HashMap::new()),
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
            permits: Arc::new(Semaphore::new(config.queue_depth)),
            queue_depth: config.queue_depth,
            overflow_policy: config.overflow_policy,
            shutdown_tx,
            executor,
            completed: AtomicU64::new(0),
        });

        let worker_count = config.worker_count.max(1);
        let workers = (0..worker_count)
            .map(|worker_id| tokio::spawn(worker_loop(worker_id, shared.clone())))
            .collect();

        info!(
            worker_count = worker_count,
            queue_depth = config.queue_depth,
            overflow_policy = ?config.overflow_policy,
            "✅ POOL: Worker pool started"
        );

        Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Reserve capacity according to the overflow policy
    pub async fn reserve(&self) -> Result<QueueSlot> {
        if self.shared.is_shut_down() {
            return Err(TaskmanError::ShutDown);
        }
        let permits = self.shared.permits.clone();
        let permit = match self.shared.overflow_policy {
            OverflowPolicy::Block => permits
                .acquire_owned()
                .await
                .map_err(|_| TaskmanError::ShutDown)?,
            OverflowPolicy::Reject => permits.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::NoPermits => TaskmanError::QueueFull(self.shared.queue_depth),
                TryAcquireError::Closed => TaskmanError::ShutDown,
            })?,
        };
        Ok(QueueSlot { permit })
    }

    /// Enqueue an item into previously reserved capacity
    pub fn enqueue(&self, slot: QueueSlot, item: WorkItem) {
        debug!(
            task_id = %item.task_id,
            kind = item.kind.name(),
            "📥 POOL: Work item enqueued"
        );
        self.shared.enqueue(slot, item);
    }

    /// Enqueue without ever failing on a full queue
    ///
    /// Enqueues immediately when capacity is available; otherwise a detached
    /// Tokio task waits for a slot.
    pub fn submit_detached(&self, item: WorkItem) -> Result<()> {
        if self.shared.is_shut_down() {
            return Err(TaskmanError::ShutDown);
        }
        match self.shared.permits.clone().try_acquire_owned() {
            Ok(permit) => {
                self.enqueue(QueueSlot { permit }, item);
                Ok(())
            }
            Err(TryAcquireError::Closed) => Err(TaskmanError::ShutDown),
            Err(TryAcquireError::NoPermits) => {
                debug!(
                    task_id = %item.task_id,
                    kind = item.kind.name(),
                    "⏳ POOL: Queue full, waiting for a slot in the background"
                );
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    match shared.permits.clone().acquire_owned().await {
                        Ok(permit) if !shared.is_shut_down() => {
                            shared.enqueue(QueueSlot { permit }, item)
                        }
                        _ => warn!(
                            task_id = %item.task_id,
                            "⚠️ POOL: Pool shut down before a slot became free, dropping work item"
                        ),
                    }
                });
                Ok(())
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            worker_count: self.worker_count,
            queue_depth: self.shared.queue_depth,
            available_slots: self.shared.permits.available_permits(),
            active_task_ids: self.shared.mailboxes.lock().len(),
            completed_items: self.shared.completed.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    /// Stop accepting work, let running items finish and join the workers
    ///
    /// Items still queued are dropped.
    pub async fn shutdown(&self) {
        if self.shared.shutdown_tx.send_replace(true) {
            return;
        }
        self.shared.permits.close();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "⚠️ POOL: Worker terminated abnormally");
            }
        }
        let dropped: usize = self
            .shared
            .mailboxes
            .lock()
            .drain()
            .map(|(_, queue)| queue.len())
            .sum();
        info!(dropped_items = dropped, "🛑 POOL: Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown_tx.send_replace(true);
        self.shared.permits.close();
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<PoolShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let next = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => None,
            task_id = async { shared.ready_rx.lock().await.recv().await } => task_id,
        };
        let Some(task_id) = next else {
            continue;
        };

        let Some(queued) = shared.take_next(task_id) else {
            continue;
        };
        let QueuedItem {
            item,
            _permit: permit,
        } = queued;
        let kind = item.kind.name();

        let outcome = AssertUnwindSafe((shared.executor)(item)).catch_unwind().await;
        if outcome.is_err() {
            error!(
                worker_id = worker_id,
                task_id = %task_id,
                kind = kind,
                "❌ POOL: Work item panicked outside the stage handler"
            );
        }
        drop(permit);
        shared.completed.fetch_add(1, Ordering::Relaxed);
        shared.finish(task_id);
    }
    debug!(worker_id = worker_id, "🛑 POOL: Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use uuid::Uuid;

    fn config(workers: usize, depth: usize, policy: OverflowPolicy) -> EngineConfig {
        EngineConfig {
            worker_count: workers,
            queue_depth: depth,
            overflow_policy: policy,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_items_for_one_id_are_serialized_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let executor: Executor = {
            let seen = seen.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            Arc::new(move |item: WorkItem| {
                let seen = seen.clone();
                let active = active.clone();
                let max_active = max_active.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if let WorkKind::Resume { data, .. } = item.kind {
                        seen.lock().push(data.payload["n"].as_i64().unwrap_or(-1));
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                }
                .boxed()
            })
        };

        let pool = WorkerPool::start(&config(4, 64, OverflowPolicy::Block), executor);
        let task_id = Uuid::new_v4();
        for n in 0..10 {
            let slot = pool.reserve().await.unwrap();
            pool.enqueue(
                slot,
                WorkItem::resume(task_id, None, StageData::success(serde_json::json!({"n": n}))),
            );
        }

        for _ in 0..200 {
            if seen.lock().len() == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<i64>>());
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_reject_policy_reports_queue_full() {
        let (release_tx, release_rx) = watch::channel(false);
        let executor: Executor = Arc::new(move |_item: WorkItem| {
            let mut release_rx = release_rx.clone();
            async move {
                let _ = release_rx.wait_for(|released| *released).await;
            }
            .boxed()
        });

        let pool = WorkerPool::start(&config(1, 1, OverflowPolicy::Reject), executor);
        let slot = pool.reserve().await.unwrap();
        pool.enqueue(slot, WorkItem::run(Uuid::new_v4(), StageData::default()));

        let err = pool.reserve().await.unwrap_err();
        assert_eq!(err, TaskmanError::QueueFull(1));

        release_tx.send_replace(true);
        pool.shutdown().await;
        assert!(matches!(pool.reserve().await, Err(TaskmanError::ShutDown)));
    }
}
