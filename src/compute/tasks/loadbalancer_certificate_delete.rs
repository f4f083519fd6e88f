//! # LoadbalancerCertificateDeleteTask
//!
//! Deletes a cached certificate through its region driver. The driver
//! reports back on `OnLoadbalancerCertificateDeleteComplete` (or its
//! `...Failed` twin). Every failure leaves the certificate in
//! `delete_failed`, writes the ops log and sends a system-error notification.

use crate::compute::models::{
    actions, LoadbalancerCertificate, LB_STATUS_DELETE_FAILED, LB_STATUS_DELETING,
};
use crate::compute::{ComputeContext, ComputeError};
use crate::constants::reasons;
use crate::orchestration::{call_with_timeout, DriverOutcome, StageData, TaskRuntime};
use crate::registry::{HandlerSet, StageFuture};
use std::sync::Arc;
use tracing::warn;

pub const TASK_TYPE: &str = "LoadbalancerCertificateDeleteTask";
pub const STAGE_DELETE_COMPLETE: &str = "OnLoadbalancerCertificateDeleteComplete";
pub const STAGE_DELETE_COMPLETE_FAILED: &str = "OnLoadbalancerCertificateDeleteCompleteFailed";

pub struct LoadbalancerCertificateDeleteTask {
    ctx: Arc<ComputeContext>,
}

impl LoadbalancerCertificateDeleteTask {
    pub fn new(ctx: Arc<ComputeContext>) -> Self {
        Self { ctx }
    }

    pub fn handlers(ctx: Arc<ComputeContext>) -> HandlerSet {
        HandlerSet::for_target(Arc::new(Self::new(ctx)))
            .on_init(Self::on_init)
            .stage(STAGE_DELETE_COMPLETE, Self::on_delete_complete)
            .stage(STAGE_DELETE_COMPLETE_FAILED, Self::on_delete_complete_failed)
            .build()
    }

    fn on_init<'a>(&'a self, task: &'a mut TaskRuntime, _data: StageData) -> StageFuture<'a> {
        Box::pin(async move {
            let certificate = self
                .ctx
                .repository
                .get_certificate(&task.subject().id)
                .await?;
            if certificate.region_id.is_none() {
                return self
                    .task_fail(task, &certificate.id, "GetRegion: certificate has no region")
                    .await;
            }
            self.ctx
                .repository
                .set_certificate_status(&certificate.id, LB_STATUS_DELETING, "")
                .await?;

            task.set_stage(STAGE_DELETE_COMPLETE, None).await?;
            let callback = task.callback();
            let outcome = match self.ctx.drivers.region_driver(&certificate.provider) {
                Ok(driver) => call_with_timeout(
                    "request_delete_loadbalancer_certificate",
                    self.ctx.config.driver_call_timeout(),
                    driver.request_delete_loadbalancer_certificate(&certificate, callback),
                )
                .await
                .map_err(ComputeError::from),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(DriverOutcome::Pending) => Ok(()),
                Ok(DriverOutcome::Completed(_)) => self.finish(task, &certificate).await,
                Err(e) => {
                    let reason = format!("RequestDeleteLoadbalancerCertificate: {e}");
                    self.task_fail(task, &certificate.id, &reason).await
                }
            }
        })
    }

    fn on_delete_complete<'a>(
        &'a self,
        task: &'a mut TaskRuntime,
        _data: StageData,
    ) -> StageFuture<'a> {
        Box::pin(async move {
            let certificate = self
                .ctx
                .repository
                .get_certificate(&task.subject().id)
                .await?;
            self.finish(task, &certificate).await
        })
    }

    fn on_delete_complete_failed<'a>(
        &'a self,
        task: &'a mut TaskRuntime,
        data: StageData,
    ) -> StageFuture<'a> {
        Box::pin(async move {
            let reason = data
                .reason()
                .unwrap_or_else(|| reasons::CALLBACK_FAILED.to_string());
            let certificate_id = task.subject().id.clone();
            self.task_fail(task, &certificate_id, &reason).await
        })
    }

    async fn finish(
        &self,
        task: &mut TaskRuntime,
        certificate: &LoadbalancerCertificate,
    ) -> anyhow::Result<()> {
        task.log_event(actions::ACT_DELETE, certificate.short_desc(), true);
        self.ctx
            .repository
            .real_delete_certificate(&certificate.id)
            .await?;
        task.set_stage_complete(None).await?;
        Ok(())
    }

    async fn task_fail(
        &self,
        task: &mut TaskRuntime,
        certificate_id: &str,
        reason: &str,
    ) -> anyhow::Result<()> {
        if let Err(e) = self
            .ctx
            .repository
            .set_certificate_status(certificate_id, LB_STATUS_DELETE_FAILED, reason)
            .await
        {
            warn!(
                task_id = %task.task_id(),
                certificate_id = certificate_id,
                error = %e,
                "⚠️ LBCERT: Failed to record delete_failed status"
            );
        }
        task.log_event(actions::ACT_DELOCATE_FAIL, reason, false);
        task.set_stage_failed(reason).await?;
        Ok(())
    }
}
