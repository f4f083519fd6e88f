//! # DiskDeleteTask
//!
//! ```text
//! OnInit ──attached──► failed
//!   │
//!   ├──pending delete enabled──► recycle ──► complete
//!   │
//!   └──deallocating──► OnDeallocateComplete ──► real delete ──► complete
//!                         └─ OnDeallocateCompleteFailed ──► dealloc_failed ──► failed
//! ```
//!
//! Params: `purge` skips the host when it is missing or disabled;
//! `override_pending_delete` forces a real delete while pending delete is
//! enabled.

use crate::compute::models::{actions, Disk, Host, DISK_DEALLOC, DISK_DEALLOC_FAILED, DISK_INIT};
use crate::compute::{ComputeContext, ComputeError};
use crate::constants::reasons;
use crate::orchestration::{call_with_timeout, DriverOutcome, StageData, TaskRuntime};
use crate::registry::{HandlerSet, StageFuture};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

pub const TASK_TYPE: &str = "DiskDeleteTask";
pub const STAGE_DEALLOCATE_COMPLETE: &str = "OnDeallocateComplete";
pub const STAGE_DEALLOCATE_COMPLETE_FAILED: &str = "OnDeallocateCompleteFailed";

pub const PARAM_PURGE: &str = "purge";
pub const PARAM_OVERRIDE_PENDING_DELETE: &str = "override_pending_delete";

pub const REASON_ATTACHED: &str = "Disk has been attached to server";

pub struct DiskDeleteTask {
    ctx: Arc<ComputeContext>,
}

impl DiskDeleteTask {
    pub fn new(ctx: Arc<ComputeContext>) -> Self {
        Self { ctx }
    }

    pub fn handlers(ctx: Arc<ComputeContext>) -> HandlerSet {
        HandlerSet::for_target(Arc::new(Self::new(ctx)))
            .on_init(Self::on_init)
            .stage(STAGE_DEALLOCATE_COMPLETE, Self::on_deallocate_complete)
            .stage(
                STAGE_DEALLOCATE_COMPLETE_FAILED,
                Self::on_deallocate_complete_failed,
            )
            .build()
    }

    fn on_init<'a>(&'a self, task: &'a mut TaskRuntime, _data: StageData) -> StageFuture<'a> {
        Box::pin(async move {
            let disk = self.ctx.repository.get_disk(&task.subject().id).await?;

            if disk.guest_count() > 0 {
                task.log_event(actions::ACT_DELOCATE_FAIL, REASON_ATTACHED, false);
                task.set_stage_failed(REASON_ATTACHED).await?;
                return Ok(());
            }

            let purge = task.param_bool(PARAM_PURGE, false);
            let override_pending = task.param_bool(PARAM_OVERRIDE_PENDING_DELETE, false);
            if self.ctx.config.enable_pending_delete
                && !disk.pending_deleted
                && !purge
                && !override_pending
            {
                self.start_pending_delete(task, &disk).await
            } else {
                self.start_delete(task, disk).await
            }
        })
    }

    fn on_deallocate_complete<'a>(
        &'a self,
        task: &'a mut TaskRuntime,
        _data: StageData,
    ) -> StageFuture<'a> {
        Box::pin(async move {
            let disk = self.ctx.repository.get_disk(&task.subject().id).await?;
            self.finish_delete(task, &disk).await
        })
    }

    fn on_deallocate_complete_failed<'a>(
        &'a self,
        task: &'a mut TaskRuntime,
        data: StageData,
    ) -> StageFuture<'a> {
        Box::pin(async move {
            let reason = data
                .reason()
                .unwrap_or_else(|| reasons::CALLBACK_FAILED.to_string());
            let disk_id = task.subject().id.clone();
            self.fail_delete(task, &disk_id, &reason).await
        })
    }

    async fn start_pending_delete(&self, task: &mut TaskRuntime, disk: &Disk) -> anyhow::Result<()> {
        self.ctx.repository.pending_delete_disk(&disk.id).await?;
        task.log_event(actions::ACT_PENDING_DELETE, disk.short_desc(), true);
        info!(task_id = %task.task_id(), disk_id = %disk.id, "♻️ DISK: Disk moved to recycle bin");
        task.set_stage_complete(Some(json!({ "pending_deleted": true })))
            .await?;
        Ok(())
    }

    async fn start_delete(&self, task: &mut TaskRuntime, disk: Disk) -> anyhow::Result<()> {
        task.log_event(actions::ACT_DELOCATING, disk.short_desc(), true);
        if disk.status == DISK_INIT {
            return self.finish_delete(task, &disk).await;
        }

        let host = self.master_host(&disk).await?;
        let host_usable = host.as_ref().is_some_and(|h| h.enabled);
        let purge = task.param_bool(PARAM_PURGE, false);

        self.ctx
            .repository
            .set_disk_status(&disk.id, DISK_DEALLOC, "")
            .await?;
        if purge && !host_usable {
            debug!(task_id = %task.task_id(), disk_id = %disk.id, "🧹 DISK: Purging without host");
            return self.finish_delete(task, &disk).await;
        }

        task.set_stage(STAGE_DEALLOCATE_COMPLETE, None).await?;
        let Some(host) = host else {
            return self.fail_delete(task, &disk.id, "fail to find master host").await;
        };

        let callback = task.callback();
        let outcome = match self.ctx.drivers.host_driver(&host.host_type) {
            Ok(driver) => call_with_timeout(
                "request_deallocate_disk",
                self.ctx.config.driver_call_timeout(),
                driver.request_deallocate_disk(&host, &disk, callback),
            )
            .await
            .map_err(ComputeError::from),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(DriverOutcome::Pending) => Ok(()),
            Ok(DriverOutcome::Completed(_)) => self.finish_delete(task, &disk).await,
            Err(e) => self.fail_delete(task, &disk.id, &e.to_string()).await,
        }
    }

    async fn master_host(&self, disk: &Disk) -> anyhow::Result<Option<Host>> {
        let Some(host_id) = disk.host_id.as_deref() else {
            return Ok(None);
        };
        match self.ctx.repository.get_host(host_id).await {
            Ok(host) => Ok(Some(host)),
            Err(ComputeError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_delete(&self, task: &mut TaskRuntime, disk: &Disk) -> anyhow::Result<()> {
        task.log_event(actions::ACT_DELOCATE, disk.short_desc(), true);
        self.ctx.repository.real_delete_disk(&disk.id).await?;
        info!(task_id = %task.task_id(), disk_id = %disk.id, "✅ DISK: Disk deleted");
        task.set_stage_complete(Some(json!({ "disk_id": disk.id })))
            .await?;
        Ok(())
    }

    async fn fail_delete(
        &self,
        task: &mut TaskRuntime,
        disk_id: &str,
        reason: &str,
    ) -> anyhow::Result<()> {
        self.ctx
            .repository
            .set_disk_status(disk_id, DISK_DEALLOC_FAILED, reason)
            .await?;
        task.set_stage_failed(reason).await?;
        task.log_event(actions::ACT_DELOCATE_FAIL, reason, false);
        Ok(())
    }
}
