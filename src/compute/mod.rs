//! # Compute Tasks
//!
//! Business task types for compute resources built on the orchestration
//! engine: disk delete, guest delete (parent of disk deletes), load balancer
//! certificate delete and EIP bandwidth change.
//!
//! ```rust,ignore
//! let ctx = Arc::new(ComputeContext::new(repository, drivers, config.compute.clone()));
//! register_compute_tasks(system.manager(), ctx)?;
//! ```

pub mod drivers;
pub mod models;
pub mod repository;
pub mod tasks;

use crate::config::ComputeConfig;
use std::sync::Arc;

pub use drivers::{BaseHostDriver, BaseRegionDriver, DriverRegistry, HostDriver, RegionDriver};
pub use repository::{ComputeError, ComputeRepository, ComputeResult};
pub use tasks::register_compute_tasks;

/// Collaborators shared by all compute task handlers
pub struct ComputeContext {
    pub repository: Arc<dyn ComputeRepository>,
    pub drivers: Arc<DriverRegistry>,
    pub config: ComputeConfig,
}

impl ComputeContext {
    pub fn new(
        repository: Arc<dyn ComputeRepository>,
        drivers: Arc<DriverRegistry>,
        config: ComputeConfig,
    ) -> Self {
        Self {
            repository,
            drivers,
            config,
        }
    }
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("drivers", &self.drivers)
            .field("config", &self.config)
            .finish()
    }
}
