//! # GuestDeleteTask
//!
//! Detaches every disk of a guest, then deletes each disk through its own
//! `DiskDeleteTask` child. Children are created only once every detach has
//! succeeded; a refused detach fails the task with the guest in
//! `delete_failed`. The task then waits in `OnDisksDeleted` for the children to
//! finish. Child outcomes are appended to `child_outcomes` in the order they
//! arrive. The guest is deleted only when every disk was; otherwise the task
//! fails and the guest is left in `delete_failed`.

use super::disk_delete::{self, PARAM_OVERRIDE_PENDING_DELETE, PARAM_PURGE};
use crate::compute::models::{actions, Disk, Guest, Host, GUEST_DELETE_FAILED, GUEST_DELETING};
use crate::compute::{ComputeContext, ComputeError};
use crate::models::{NewTask, TaskId};
use crate::orchestration::{StageData, TaskRuntime};
use crate::registry::{HandlerSet, StageFuture};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const TASK_TYPE: &str = "GuestDeleteTask";
pub const STAGE_DISKS_DELETED: &str = "OnDisksDeleted";
pub const STAGE_DISKS_DELETED_FAILED: &str = "OnDisksDeletedFailed";

/// Params key holding the ids of the disk-delete children
pub const PARAM_PENDING_CHILDREN: &str = "pending_children";
/// Params key holding one `{task_id, disk_id, succeeded, reason}` per finished child
pub const PARAM_CHILD_OUTCOMES: &str = "child_outcomes";

pub struct GuestDeleteTask {
    ctx: Arc<ComputeContext>,
}

impl GuestDeleteTask {
    pub fn new(ctx: Arc<ComputeContext>) -> Self {
        Self { ctx }
    }

    pub fn handlers(ctx: Arc<ComputeContext>) -> HandlerSet {
        HandlerSet::for_target(Arc::new(Self::new(ctx)))
            .on_init(Self::on_init)
            .stage(STAGE_DISKS_DELETED, Self::on_disks_deleted)
            .stage(STAGE_DISKS_DELETED_FAILED, Self::on_disks_deleted)
            .build()
    }

    fn on_init<'a>(&'a self, task: &'a mut TaskRuntime, _data: StageData) -> StageFuture<'a> {
        Box::pin(async move {
            let repository = &self.ctx.repository;
            let guest = repository.get_guest(&task.subject().id).await?;
            repository
                .set_guest_status(&guest.id, GUEST_DELETING, "")
                .await?;

            if guest.disk_ids.is_empty() {
                return self.finish(task, &guest, 0).await;
            }

            let host = self.guest_host(&guest).await?;
            let disks = match self.detach_disks(task, &guest, host.as_ref()).await {
                Ok(disks) => disks,
                Err(e) => {
                    let reason = format!("{e:#}");
                    repository
                        .set_guest_status(&guest.id, GUEST_DELETE_FAILED, &reason)
                        .await?;
                    return Err(e);
                }
            };

            let child_params = json!({
                PARAM_PURGE: task.param_bool(PARAM_PURGE, false),
                PARAM_OVERRIDE_PENDING_DELETE: task.param_bool(PARAM_OVERRIDE_PENDING_DELETE, false),
            });
            let mut children: Vec<TaskId> = Vec::with_capacity(disks.len());
            for disk in &disks {
                let request = NewTask::new(disk_delete::TASK_TYPE, disk.subject())
                    .with_params(child_params.clone());
                match task.new_subtask(request).await {
                    Ok(child) => children.push(child.id()),
                    Err(e) => {
                        Self::abandon_children(task, &children, &e.to_string()).await;
                        return Err(e.into());
                    }
                }
            }

            let waiting = task
                .set_stage(
                    STAGE_DISKS_DELETED,
                    Some(json!({
                        PARAM_PENDING_CHILDREN: children,
                        PARAM_CHILD_OUTCOMES: [],
                    })),
                )
                .await;
            if let Err(e) = waiting {
                Self::abandon_children(task, &children, &e.to_string()).await;
                return Err(e.into());
            }

            for child_id in children {
                task.schedule_subtask(child_id).await?;
            }
            Ok(())
        })
    }

    fn on_disks_deleted<'a>(&'a self, task: &'a mut TaskRuntime, data: StageData) -> StageFuture<'a> {
        Box::pin(async move {
            let Some(child) = data.child else {
                anyhow::bail!("{} resumed without a child outcome", task.invoked_stage());
            };

            let mut outcomes: Vec<Value> = task
                .params()
                .get(PARAM_CHILD_OUTCOMES)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            outcomes.push(json!({
                "task_id": child.task_id,
                "disk_id": child.subject.id,
                "succeeded": child.succeeded,
                "reason": child.reason,
            }));
            let expected = task
                .params()
                .get(PARAM_PENDING_CHILDREN)
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            let finished = outcomes.len();
            let failed = outcomes
                .iter()
                .filter(|o| o.get("succeeded") != Some(&Value::Bool(true)))
                .count();

            task.set_stage(
                STAGE_DISKS_DELETED,
                Some(json!({ PARAM_CHILD_OUTCOMES: outcomes })),
            )
            .await?;

            info!(
                task_id = %task.task_id(),
                child_id = %child.task_id,
                succeeded = child.succeeded,
                finished = finished,
                expected = expected,
                "📥 GUEST: Disk delete finished"
            );
            if finished < expected {
                return Ok(());
            }

            let guest = self.ctx.repository.get_guest(&task.subject().id).await?;
            if failed > 0 {
                let reason = format!("failed to delete {failed} of {expected} disks");
                self.ctx
                    .repository
                    .set_guest_status(&guest.id, GUEST_DELETE_FAILED, &reason)
                    .await?;
                task.log_event(actions::ACT_DELOCATE_FAIL, reason.as_str(), false);
                task.set_stage_failed(reason).await?;
                return Ok(());
            }
            self.finish(task, &guest, expected).await
        })
    }

    /// Detach every disk; no child task exists until this succeeds
    async fn detach_disks(
        &self,
        task: &TaskRuntime,
        guest: &Guest,
        host: Option<&Host>,
    ) -> anyhow::Result<Vec<Disk>> {
        let repository = &self.ctx.repository;
        let mut disks = Vec::with_capacity(guest.disk_ids.len());
        for disk_id in &guest.disk_ids {
            let disk = repository.get_disk(disk_id).await?;
            if let Some(host) = host {
                self.ctx
                    .drivers
                    .host_driver(&host.host_type)?
                    .request_detach_disk(host, guest, &disk)
                    .await
                    .map_err(ComputeError::from)?;
            }
            repository.detach_disk(&guest.id, &disk.id).await?;
            task.log_event(actions::ACT_DETACH_DISK, disk.short_desc(), true);
            disks.push(disk);
        }
        Ok(disks)
    }

    async fn abandon_children(task: &TaskRuntime, children: &[TaskId], why: &str) {
        for child_id in children {
            let reason = format!("guest delete aborted: {why}");
            if let Err(e) = task.manager().force_fail(*child_id, reason).await {
                warn!(
                    task_id = %task.task_id(),
                    child_id = %child_id,
                    error = %e,
                    "⚠️ GUEST: Failed to abandon disk delete child"
                );
            }
        }
    }

    async fn guest_host(&self, guest: &Guest) -> anyhow::Result<Option<Host>> {
        let Some(host_id) = guest.host_id.as_deref() else {
            return Ok(None);
        };
        match self.ctx.repository.get_host(host_id).await {
            Ok(host) => Ok(Some(host)),
            Err(ComputeError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn finish(&self, task: &mut TaskRuntime, guest: &Guest, disks: usize) -> anyhow::Result<()> {
        self.ctx.repository.real_delete_guest(&guest.id).await?;
        task.log_event(actions::ACT_DELETE, guest.name.as_str(), true);
        task.set_stage_complete(Some(json!({ "deleted_disks": disks })))
            .await?;
        Ok(())
    }
}
