//! # Taskman Configuration
//!
//! Typed, validated configuration for the engine, its store, the supervisor
//! sweeps, the audit trail and the compute task policies.
//!
//! Sources are layered by [`ConfigManager`]:
//!
//! 1. `config/taskman.toml`
//! 2. `config/taskman.{environment}.toml` (optional)
//! 3. `TASKMAN__SECTION__KEY` environment variables
//!
//! ```rust,no_run
//! use taskman_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let workers = manager.config().engine.worker_count;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::system;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskmanConfig {
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub supervision: SupervisionConfig,
    pub retry: RetryConfig,
    pub audit: AuditConfig,
    pub compute: ComputeConfig,
}

/// What a submitter experiences when the work queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for a slot
    #[default]
    Block,
    /// Fail fast with `QueueFull`
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker tasks executing stage invocations
    pub worker_count: usize,
    /// Maximum queued plus in-flight work items
    pub queue_depth: usize,
    pub overflow_policy: OverflowPolicy,
    /// Capacity of the lifecycle event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: system::DEFAULT_WORKER_COUNT,
            queue_depth: system::DEFAULT_QUEUE_DEPTH,
            overflow_policy: OverflowPolicy::Block,
            event_channel_capacity: system::DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Apply bundled migrations at bootstrap
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisionConfig {
    pub enabled: bool,
    /// `running` tasks not updated for this long are failed; `None` disables the sweep
    pub stale_task_timeout_seconds: Option<u64>,
    pub sweep_interval_seconds: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stale_task_timeout_seconds: None,
            sweep_interval_seconds: 60,
        }
    }
}

impl SupervisionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn stale_task_timeout(&self) -> Option<Duration> {
        self.stale_task_timeout_seconds.map(Duration::from_secs)
    }
}

/// Re-creation of failed tasks by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Task types eligible for re-creation
    pub task_types: Vec<String>,
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Only tasks created within this window are considered
    pub window_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            task_types: Vec::new(),
            max_attempts: 3,
            window_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub ops_log_enabled: bool,
    /// Bounded queue in front of the ops-log sink
    pub buffer_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            ops_log_enabled: true,
            buffer_size: system::DEFAULT_OPS_LOG_BUFFER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Move deleted disks to a recycle state instead of deallocating them
    pub enable_pending_delete: bool,
    /// Upper bound on a single driver request before the stage fails
    pub driver_call_timeout_seconds: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            enable_pending_delete: false,
            driver_call_timeout_seconds: 60,
        }
    }
}

impl ComputeConfig {
    pub fn driver_call_timeout(&self) -> Duration {
        Duration::from_secs(self.driver_call_timeout_seconds)
    }
}

impl TaskmanConfig {
    /// Check cross-field constraints the type system cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.worker_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.worker_count",
                0,
                "at least one worker is required",
            ));
        }
        if self.engine.queue_depth == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.queue_depth",
                0,
                "queue depth must be positive",
            ));
        }
        if self.database.backend == StoreBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "url",
                "database (backend = postgres)",
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigurationError::invalid_value(
                "database.min_connections",
                self.database.min_connections,
                format!(
                    "must not exceed max_connections ({})",
                    self.database.max_connections
                ),
            ));
        }
        if self.supervision.enabled && self.supervision.sweep_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "supervision.sweep_interval_seconds",
                0,
                "sweep interval must be positive when supervision is enabled",
            ));
        }
        if self.supervision.stale_task_timeout_seconds == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "supervision.stale_task_timeout_seconds",
                0,
                "omit the key to disable the staleness sweep",
            ));
        }
        if self.retry.enabled && self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                0,
                "at least one attempt is required",
            ));
        }
        if self.compute.driver_call_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "compute.driver_call_timeout_seconds",
                0,
                "driver calls need a positive timeout",
            ));
        }
        if self.audit.buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "audit.buffer_size",
                0,
                "buffer size must be positive",
            ));
        }
        Ok(())
    }
}
