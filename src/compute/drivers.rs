//! # Provider Drivers
//!
//! Capability traits for host- and region-level remote operations. Every
//! method has a default body, which is the base adapter: operations a provider
//! cannot perform report [`DriverError::NotImplemented`], and operations that
//! need no remote step complete immediately. Providers override only what
//! they support.
//!
//! Methods that may finish later take a [`TaskCallback`] and return
//! [`DriverOutcome::Pending`] once the remote side has accepted the work.

use super::models::{Disk, Elasticip, Guest, Host, LoadbalancerCertificate};
use super::repository::{ComputeError, ComputeResult};
use crate::orchestration::{DriverError, DriverOutcome, TaskCallback};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub type DriverResult<T> = Result<T, DriverError>;

#[async_trait]
pub trait HostDriver: Send + Sync {
    /// Registry key, matched against [`Host::host_type`]
    fn host_type(&self) -> &str;

    async fn request_deallocate_disk(
        &self,
        _host: &Host,
        _disk: &Disk,
        _callback: TaskCallback,
    ) -> DriverResult<DriverOutcome> {
        Err(DriverError::not_implemented(
            self.host_type(),
            "request_deallocate_disk",
        ))
    }

    /// Detach a disk from a guest before the disk is deleted
    async fn request_detach_disk(
        &self,
        _host: &Host,
        _guest: &Guest,
        _disk: &Disk,
    ) -> DriverResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait RegionDriver: Send + Sync {
    /// Registry key, matched against the resource's provider
    fn provider(&self) -> &str;

    async fn request_delete_loadbalancer_certificate(
        &self,
        _certificate: &LoadbalancerCertificate,
        _callback: TaskCallback,
    ) -> DriverResult<DriverOutcome> {
        Err(DriverError::not_implemented(
            self.provider(),
            "request_delete_loadbalancer_certificate",
        ))
    }

    /// Change bandwidth of the provider-side EIP
    async fn change_eip_bandwidth(&self, _eip: &Elasticip, _bandwidth: i64) -> DriverResult<()> {
        Err(DriverError::not_implemented(
            self.provider(),
            "change_eip_bandwidth",
        ))
    }
}

/// Host driver with no overrides
#[derive(Debug, Clone)]
pub struct BaseHostDriver {
    host_type: String,
}

impl BaseHostDriver {
    pub fn new(host_type: impl Into<String>) -> Self {
        Self {
            host_type: host_type.into(),
        }
    }
}

impl HostDriver for BaseHostDriver {
    fn host_type(&self) -> &str {
        &self.host_type
    }
}

/// Region driver with no overrides
#[derive(Debug, Clone)]
pub struct BaseRegionDriver {
    provider: String,
}

impl BaseRegionDriver {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl RegionDriver for BaseRegionDriver {
    fn provider(&self) -> &str {
        &self.provider
    }
}

/// Process-scoped lookup of drivers by host type and provider
#[derive(Default)]
pub struct DriverRegistry {
    host_drivers: RwLock<HashMap<String, Arc<dyn HostDriver>>>,
    region_drivers: RwLock<HashMap<String, Arc<dyn RegionDriver>>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut hosts: Vec<String> = self.host_drivers.read().keys().cloned().collect();
        let mut regions: Vec<String> = self.region_drivers.read().keys().cloned().collect();
        hosts.sort_unstable();
        regions.sort_unstable();
        f.debug_struct("DriverRegistry")
            .field("host_drivers", &hosts)
            .field("region_drivers", &regions)
            .finish()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the driver for its host type
    pub fn register_host_driver(&self, driver: Arc<dyn HostDriver>) {
        let key = driver.host_type().to_string();
        info!(host_type = %key, "✅ DRIVERS: Registered host driver");
        self.host_drivers.write().insert(key, driver);
    }

    /// Register (or replace) the driver for its provider
    pub fn register_region_driver(&self, driver: Arc<dyn RegionDriver>) {
        let key = driver.provider().to_string();
        info!(provider = %key, "✅ DRIVERS: Registered region driver");
        self.region_drivers.write().insert(key, driver);
    }

    pub fn host_driver(&self, host_type: &str) -> ComputeResult<Arc<dyn HostDriver>> {
        self.host_drivers
            .read()
            .get(host_type)
            .cloned()
            .ok_or_else(|| {
                ComputeError::Driver(DriverError::Unavailable(format!(
                    "no host driver for {host_type}"
                )))
            })
    }

    pub fn region_driver(&self, provider: &str) -> ComputeResult<Arc<dyn RegionDriver>> {
        self.region_drivers
            .read()
            .get(provider)
            .cloned()
            .ok_or_else(|| {
                ComputeError::Driver(DriverError::Unavailable(format!(
                    "no region driver for {provider}"
                )))
            })
    }
}
