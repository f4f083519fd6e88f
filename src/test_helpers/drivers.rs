//! Provider drivers whose behaviour is scripted by the test.

use crate::compute::models::{Disk, Elasticip, Guest, Host, LoadbalancerCertificate};
use crate::compute::{HostDriver, RegionDriver};
use crate::orchestration::{DriverError, DriverOutcome, TaskCallback};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// How a scripted driver answers an asynchronous request
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Keep the callback for the test to fire
    Pending,
    /// Finish synchronously
    Complete,
    /// Refuse the request
    Error(String),
}

/// One request received by a scripted driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub operation: &'static str,
    pub resource_id: String,
}

#[derive(Default)]
struct Script {
    reply: Option<ScriptedReply>,
    refused_detach: Option<String>,
    calls: Vec<DriverCall>,
    callbacks: Vec<TaskCallback>,
}

impl Script {
    fn record(&mut self, operation: &'static str, resource_id: &str) {
        self.calls.push(DriverCall {
            operation,
            resource_id: resource_id.to_string(),
        });
    }

    fn answer(&mut self, callback: TaskCallback) -> Result<DriverOutcome, DriverError> {
        match self.reply.clone().unwrap_or(ScriptedReply::Pending) {
            ScriptedReply::Pending => {
                self.callbacks.push(callback);
                Ok(DriverOutcome::Pending)
            }
            ScriptedReply::Complete => Ok(DriverOutcome::completed()),
            ScriptedReply::Error(message) => Err(DriverError::Remote(message)),
        }
    }
}

async fn wait_for(script: &Mutex<Script>, count: usize, timeout: Duration) -> Vec<DriverCall> {
    let deadline = Instant::now() + timeout;
    loop {
        let calls = script.lock().calls.clone();
        if calls.len() >= count || Instant::now() >= deadline {
            return calls;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct ScriptedHostDriver {
    host_type: String,
    script: Mutex<Script>,
}

impl ScriptedHostDriver {
    pub fn new(host_type: impl Into<String>) -> Self {
        Self {
            host_type: host_type.into(),
            script: Mutex::new(Script::default()),
        }
    }

    pub fn reply_with(self, reply: ScriptedReply) -> Self {
        self.script.lock().reply = Some(reply);
        self
    }

    /// Refuse `request_detach_disk` for `disk_id`
    pub fn refuse_detach_of(&self, disk_id: impl Into<String>) {
        self.script.lock().refused_detach = Some(disk_id.into());
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.script.lock().calls.clone()
    }

    /// Callbacks handed over by pending requests, oldest first
    pub fn take_callbacks(&self) -> Vec<TaskCallback> {
        std::mem::take(&mut self.script.lock().callbacks)
    }

    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> Vec<DriverCall> {
        wait_for(&self.script, count, timeout).await
    }
}

#[async_trait]
impl HostDriver for ScriptedHostDriver {
    fn host_type(&self) -> &str {
        &self.host_type
    }

    async fn request_deallocate_disk(
        &self,
        _host: &Host,
        disk: &Disk,
        callback: TaskCallback,
    ) -> Result<DriverOutcome, DriverError> {
        let mut script = self.script.lock();
        script.record("request_deallocate_disk", &disk.id);
        script.answer(callback)
    }

    async fn request_detach_disk(
        &self,
        _host: &Host,
        _guest: &Guest,
        disk: &Disk,
    ) -> Result<(), DriverError> {
        let mut script = self.script.lock();
        script.record("request_detach_disk", &disk.id);
        if script.refused_detach.as_deref() == Some(disk.id.as_str()) {
            return Err(DriverError::Remote(format!("disk {} is busy", disk.id)));
        }
        Ok(())
    }
}

pub struct ScriptedRegionDriver {
    provider: String,
    script: Mutex<Script>,
}

impl ScriptedRegionDriver {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            script: Mutex::new(Script::default()),
        }
    }

    pub fn reply_with(self, reply: ScriptedReply) -> Self {
        self.script.lock().reply = Some(reply);
        self
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.script.lock().calls.clone()
    }

    pub fn take_callbacks(&self) -> Vec<TaskCallback> {
        std::mem::take(&mut self.script.lock().callbacks)
    }

    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> Vec<DriverCall> {
        wait_for(&self.script, count, timeout).await
    }
}

#[async_trait]
impl RegionDriver for ScriptedRegionDriver {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn request_delete_loadbalancer_certificate(
        &self,
        certificate: &LoadbalancerCertificate,
        callback: TaskCallback,
    ) -> Result<DriverOutcome, DriverError> {
        let mut script = self.script.lock();
        script.record("request_delete_loadbalancer_certificate", &certificate.id);
        script.answer(callback)
    }

    async fn change_eip_bandwidth(&self, eip: &Elasticip, _bandwidth: i64) -> Result<(), DriverError> {
        let mut script = self.script.lock();
        script.record("change_eip_bandwidth", &eip.id);
        match script.reply.clone() {
            Some(ScriptedReply::Error(message)) => Err(DriverError::Remote(message)),
            _ => Ok(()),
        }
    }
}
