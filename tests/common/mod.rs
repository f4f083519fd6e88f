//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskman_core::compute::models::{Disk, Guest, Host, DISK_READY};
use taskman_core::compute::{register_compute_tasks, ComputeContext, DriverRegistry};
use taskman_core::config::{ComputeConfig, EngineConfig};
use taskman_core::events::PublishedEvent;
use taskman_core::orchestration::{StageData, TaskManager, TaskRuntime};
use taskman_core::registry::StageHandler;
use taskman_core::store::InMemoryTaskStore;
use taskman_core::test_helpers::{
    InMemoryCompute, RecordingNotifier, RecordingOpsLog, ScriptedHostDriver, ScriptedRegionDriver,
    ScriptedReply,
};
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(5);

/// Engine wired with recording audit sinks
pub struct TestEngine {
    pub manager: TaskManager,
    pub store: Arc<InMemoryTaskStore>,
    pub ops_log: Arc<RecordingOpsLog>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_engine_config(EngineConfig {
            worker_count: 4,
            queue_depth: 64,
            ..EngineConfig::default()
        })
    }

    pub fn with_engine_config(engine_config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryTaskStore::new());
        let ops_log = Arc::new(RecordingOpsLog::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let manager = TaskManager::builder()
            .store(store.clone())
            .ops_log(ops_log.clone())
            .notifier(notifier.clone())
            .engine_config(engine_config)
            .build()
            .expect("engine builds inside a tokio runtime");
        Self {
            manager,
            store,
            ops_log,
            notifier,
        }
    }
}

/// Compute task types over an in-memory repository and scripted drivers
pub struct ComputeFixture {
    pub engine: TestEngine,
    pub compute: Arc<InMemoryCompute>,
    pub host_driver: Arc<ScriptedHostDriver>,
    pub region_driver: Arc<ScriptedRegionDriver>,
}

impl ComputeFixture {
    pub fn new(config: ComputeConfig) -> Self {
        Self::with_replies(config, ScriptedReply::Pending, ScriptedReply::Pending)
    }

    pub fn with_replies(
        config: ComputeConfig,
        host_reply: ScriptedReply,
        region_reply: ScriptedReply,
    ) -> Self {
        let engine = TestEngine::new();
        let compute = Arc::new(InMemoryCompute::new());
        let host_driver = Arc::new(ScriptedHostDriver::new("kvm").reply_with(host_reply));
        let region_driver = Arc::new(ScriptedRegionDriver::new("aliyun").reply_with(region_reply));

        let drivers = Arc::new(DriverRegistry::new());
        drivers.register_host_driver(host_driver.clone());
        drivers.register_region_driver(region_driver.clone());

        let ctx = Arc::new(ComputeContext::new(compute.clone(), drivers, config));
        register_compute_tasks(&engine.manager, ctx).expect("compute tasks register");

        compute.insert_host(host("host-1", true));
        Self {
            engine,
            compute,
            host_driver,
            region_driver,
        }
    }

    pub fn manager(&self) -> &TaskManager {
        &self.engine.manager
    }
}

pub fn host(id: &str, enabled: bool) -> Host {
    Host {
        id: id.to_string(),
        name: format!("{id}-name"),
        enabled,
        host_type: "kvm".to_string(),
    }
}

pub fn disk(id: &str, guests: &[&str]) -> Disk {
    Disk {
        id: id.to_string(),
        name: format!("{id}-name"),
        status: DISK_READY.to_string(),
        size_mb: 10240,
        host_id: Some("host-1".to_string()),
        guest_ids: guests.iter().map(|g| g.to_string()).collect(),
        pending_deleted: false,
    }
}

pub fn guest(id: &str, disks: &[&str]) -> Guest {
    Guest {
        id: id.to_string(),
        name: format!("{id}-name"),
        status: "ready".to_string(),
        host_id: Some("host-1".to_string()),
        disk_ids: disks.iter().map(|d| d.to_string()).collect(),
    }
}

/// Drain every event already published for `task_id`
pub fn drain_events(
    events: &mut broadcast::Receiver<PublishedEvent>,
    task_id: uuid::Uuid,
) -> Vec<PublishedEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.is_for(task_id) {
            out.push(event);
        }
    }
    out
}

/// Stage names from `task.stage_invoked` events, in order
pub fn invoked_stages(events: &[PublishedEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.name == taskman_core::events::types::TASK_STAGE_INVOKED)
        .filter_map(|e| e.context.get("stage").and_then(Value::as_str).map(str::to_string))
        .collect()
}

/// Completes with the invocation payload
#[derive(Default)]
pub struct CompleteHandler {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl StageHandler for CompleteHandler {
    async fn handle(&self, task: &mut TaskRuntime, data: StageData) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        task.set_stage_complete(Some(json!({ "payload": data.payload })))
            .await?;
        Ok(())
    }
}

/// Records the next stage and waits for a callback
pub struct WaitHandler {
    pub next_stage: &'static str,
    pub calls: Arc<AtomicUsize>,
}

impl WaitHandler {
    pub fn new(next_stage: &'static str) -> Self {
        Self {
            next_stage,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl StageHandler for WaitHandler {
    async fn handle(&self, task: &mut TaskRuntime, _data: StageData) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        task.set_stage(self.next_stage, None).await?;
        Ok(())
    }
}

/// Fails the task with a fixed reason
pub struct FailHandler(pub &'static str);

#[async_trait]
impl StageHandler for FailHandler {
    async fn handle(&self, task: &mut TaskRuntime, _data: StageData) -> anyhow::Result<()> {
        task.set_stage_failed(self.0).await?;
        Ok(())
    }
}
