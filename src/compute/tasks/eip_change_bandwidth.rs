//! # EipChangeBandwidthTask
//!
//! Synchronous: completes or fails within `OnInit`. Managed EIPs are changed
//! on the provider first, then the new bandwidth is recorded locally.

use crate::compute::models::{actions, EIP_STATUS_READY};
use crate::compute::ComputeContext;
use crate::orchestration::{call_with_timeout, StageData, TaskRuntime};
use crate::registry::{HandlerSet, StageFuture};
use serde_json::json;
use std::sync::Arc;

pub const TASK_TYPE: &str = "EipChangeBandwidthTask";
pub const PARAM_BANDWIDTH: &str = "bandwidth";

pub struct EipChangeBandwidthTask {
    ctx: Arc<ComputeContext>,
}

impl EipChangeBandwidthTask {
    pub fn new(ctx: Arc<ComputeContext>) -> Self {
        Self { ctx }
    }

    pub fn handlers(ctx: Arc<ComputeContext>) -> HandlerSet {
        HandlerSet::for_target(Arc::new(Self::new(ctx)))
            .on_init(Self::on_init)
            .build()
    }

    fn on_init<'a>(&'a self, task: &'a mut TaskRuntime, _data: StageData) -> StageFuture<'a> {
        Box::pin(async move {
            let repository = &self.ctx.repository;
            let eip = repository.get_elasticip(&task.subject().id).await?;

            let bandwidth = task.param_i64(PARAM_BANDWIDTH).unwrap_or(0);
            if bandwidth <= 0 {
                return self
                    .task_fail(task, &eip.id, &format!("invalid bandwidth {bandwidth}"))
                    .await;
            }

            if let Some(provider) = eip.provider.as_deref() {
                let driver = match self.ctx.drivers.region_driver(provider) {
                    Ok(driver) => driver,
                    Err(e) => {
                        return self
                            .task_fail(task, &eip.id, &format!("fail to find iEip {e}"))
                            .await
                    }
                };
                let change = call_with_timeout(
                    "change_eip_bandwidth",
                    self.ctx.config.driver_call_timeout(),
                    driver.change_eip_bandwidth(&eip, bandwidth),
                );
                if let Err(e) = change.await {
                    return self
                        .task_fail(task, &eip.id, &format!("fail to change bandwidth {e}"))
                        .await;
                }
            }

            if let Err(e) = repository.set_elasticip_bandwidth(&eip.id, bandwidth).await {
                return self
                    .task_fail(
                        task,
                        &eip.id,
                        &format!("fail to synchronize iEip bandwidth {e}"),
                    )
                    .await;
            }
            repository
                .set_elasticip_status(&eip.id, EIP_STATUS_READY, "")
                .await?;
            task.log_event(
                actions::ACT_CHANGE_BANDWIDTH,
                format!("{} -> {bandwidth}", eip.bandwidth),
                true,
            );
            task.set_stage_complete(Some(json!({ "bandwidth": bandwidth })))
                .await?;
            Ok(())
        })
    }

    async fn task_fail(&self, task: &mut TaskRuntime, eip_id: &str, msg: &str) -> anyhow::Result<()> {
        self.ctx
            .repository
            .set_elasticip_status(eip_id, EIP_STATUS_READY, msg)
            .await?;
        task.log_event(actions::ACT_CHANGE_BANDWIDTH, msg, false);
        task.set_stage_failed(msg).await?;
        Ok(())
    }
}
