//! # System Bootstrap
//!
//! Wires a [`TaskManager`] and its collaborators from a [`TaskmanConfig`].
//!
//! ```rust,no_run
//! use taskman_core::config::ConfigManager;
//! use taskman_core::orchestration::TaskmanSystem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?;
//! let system = TaskmanSystem::from_config_manager(&config).await?;
//! // register task types on system.manager() ...
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

use super::supervisor::{SupervisorHandle, TaskSupervisor};
use super::task_manager::TaskManager;
use crate::audit::{BufferedOpsLog, NoopOpsLog, OpsLog, TracingNotifier, TracingOpsLog};
use crate::config::{ConfigManager, StoreBackend, TaskmanConfig};
use crate::error::Result;
use crate::store::{InMemoryTaskStore, TaskStore};
use std::sync::Arc;
use tracing::info;

/// A running engine: manager, store and optional supervisor
pub struct TaskmanSystem {
    manager: TaskManager,
    config: TaskmanConfig,
    supervisor: Option<SupervisorHandle>,
}

impl TaskmanSystem {
    /// Validate `config`, open the configured store and start the engine
    pub async fn bootstrap(config: TaskmanConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn TaskStore> = match config.database.backend {
            StoreBackend::Memory => Arc::new(InMemoryTaskStore::new()),
            StoreBackend::Postgres => Self::postgres_store(&config).await?,
        };
        Self::bootstrap_with_store(config, store)
    }

    pub async fn from_config_manager(config_manager: &ConfigManager) -> Result<Self> {
        info!(
            environment = config_manager.environment(),
            "🚀 BOOTSTRAP: Starting taskman system"
        );
        Self::bootstrap(config_manager.config().clone()).await
    }

    /// Start the engine over a caller-provided store
    pub fn bootstrap_with_store(config: TaskmanConfig, store: Arc<dyn TaskStore>) -> Result<Self> {
        config.validate()?;
        let ops_log: Arc<dyn OpsLog> = if config.audit.ops_log_enabled {
            Arc::new(BufferedOpsLog::spawn(
                Arc::new(TracingOpsLog),
                config.audit.buffer_size,
            ))
        } else {
            Arc::new(NoopOpsLog)
        };

        let manager = TaskManager::builder()
            .store(store)
            .ops_log(ops_log)
            .notifier(Arc::new(TracingNotifier))
            .engine_config(config.engine.clone())
            .build()?;

        let supervisor = config.supervision.enabled.then(|| {
            TaskSupervisor::new(
                manager.clone(),
                config.supervision.clone(),
                config.retry.clone(),
            )
            .spawn()
        });

        info!(
            workers = config.engine.worker_count,
            queue_depth = config.engine.queue_depth,
            backend = ?config.database.backend,
            supervision = config.supervision.enabled,
            "✅ BOOTSTRAP: Taskman system ready"
        );
        Ok(Self {
            manager,
            config,
            supervisor,
        })
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    pub fn config(&self) -> &TaskmanConfig {
        &self.config
    }

    pub fn has_supervisor(&self) -> bool {
        self.supervisor.is_some()
    }

    /// Stop the supervisor, then the worker pool
    pub async fn shutdown(self) {
        if let Some(supervisor) = self.supervisor {
            supervisor.stop().await;
        }
        self.manager.shutdown().await;
        info!("🛑 BOOTSTRAP: Taskman system stopped");
    }

    #[cfg(feature = "postgres")]
    async fn postgres_store(config: &TaskmanConfig) -> Result<Arc<dyn TaskStore>> {
        let store = crate::store::PgTaskStore::connect(&config.database).await?;
        if config.database.run_migrations {
            store.migrate().await?;
            info!("✅ BOOTSTRAP: Task store migrations applied");
        }
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "postgres"))]
    async fn postgres_store(_config: &TaskmanConfig) -> Result<Arc<dyn TaskStore>> {
        Err(crate::error::TaskmanError::ConfigurationError(
            "database.backend = postgres requires the `postgres` feature".to_string(),
        ))
    }
}

impl std::fmt::Debug for TaskmanSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskmanSystem")
            .field("manager", &self.manager)
            .field("supervisor", &self.supervisor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_memory_backend() {
        let system = TaskmanSystem::bootstrap(TaskmanConfig::default()).await.unwrap();
        assert!(!system.has_supervisor());
        assert_eq!(system.manager().pool_stats().worker_count, 8);
        system.shutdown().await;
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_invalid_config() {
        let mut config = TaskmanConfig::default();
        config.engine.worker_count = 0;
        let err = TaskmanSystem::bootstrap(config).await.unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_bootstrap_spawns_supervisor_when_enabled() {
        let mut config = TaskmanConfig::default();
        config.supervision.enabled = true;
        config.supervision.sweep_interval_seconds = 3600;
        let system = TaskmanSystem::bootstrap(config).await.unwrap();
        assert!(system.has_supervisor());
        system.shutdown().await;
    }
}
