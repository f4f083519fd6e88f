//! Compute task types and their registration.

pub mod disk_delete;
pub mod eip_change_bandwidth;
pub mod guest_delete;
pub mod loadbalancer_certificate_delete;

use super::ComputeContext;
use crate::error::Result;
use crate::orchestration::TaskManager;
use std::sync::Arc;

pub use disk_delete::DiskDeleteTask;
pub use eip_change_bandwidth::EipChangeBandwidthTask;
pub use guest_delete::GuestDeleteTask;
pub use loadbalancer_certificate_delete::LoadbalancerCertificateDeleteTask;

/// Register every compute task type on `manager`
pub fn register_compute_tasks(manager: &TaskManager, ctx: Arc<ComputeContext>) -> Result<()> {
    manager.register_task_type(disk_delete::TASK_TYPE, DiskDeleteTask::handlers(ctx.clone()))?;
    manager.register_task_type(guest_delete::TASK_TYPE, GuestDeleteTask::handlers(ctx.clone()))?;
    manager.register_task_type(
        loadbalancer_certificate_delete::TASK_TYPE,
        LoadbalancerCertificateDeleteTask::handlers(ctx.clone()),
    )?;
    manager.register_task_type(
        eip_change_bandwidth::TASK_TYPE,
        EipChangeBandwidthTask::handlers(ctx),
    )?;
    Ok(())
}
