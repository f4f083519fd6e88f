#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskman Core
//!
//! Staged asynchronous task orchestration engine for cloud control-plane
//! lifecycle operations.
//!
//! ## Overview
//!
//! A single logical operation ("delete this disk") is broken into named
//! stages. Each stage runs to a transition: record the next stage and wait for
//! a callback, complete, or fail. Callbacks from remote agents may arrive
//! seconds or hours later; the task sits in the store as a row until then.
//! Tasks compose into parent/child hierarchies: a child's terminal transition
//! resumes its parent.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Task manager, worker pool, stage dispatch, propagation, supervisor
//! - [`registry`] - `task type -> stage -> handler` dispatch table
//! - [`state_machine`] - Task lifecycle states, events and transition actions
//! - [`store`] - Task persistence (in-memory and Postgres)
//! - [`models`] - Task, subject and request context types
//! - [`events`] - Lifecycle event broadcast
//! - [`audit`] - Ops log and failure notifications
//! - [`config`] - Layered configuration
//! - [`compute`] - Compute resource task types built on the engine
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use taskman_core::models::{NewTask, SubjectRef};
//! use taskman_core::orchestration::{StageData, TaskManager, TaskRuntime};
//! use taskman_core::registry::{HandlerSet, StageHandler};
//!
//! struct Noop;
//!
//! #[async_trait::async_trait]
//! impl StageHandler for Noop {
//!     async fn handle(&self, task: &mut TaskRuntime, _data: StageData) -> anyhow::Result<()> {
//!         task.set_stage_complete(None).await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TaskManager::builder().build()?;
//! manager.register_task_type("NoopTask", HandlerSet::new().stage("OnInit", Noop))?;
//!
//! let handle = manager
//!     .start_task(NewTask::new("NoopTask", SubjectRef::new("guest", "g-1")))
//!     .await?;
//! let task = handle.wait(Duration::from_secs(5)).await?;
//! assert!(task.is_terminal());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                       # Unit and integration tests
//! cargo test -- --ignored          # Postgres store tests (needs DATABASE_URL)
//! ```

pub mod audit;
pub mod compute;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod store;
pub mod test_helpers;

pub use config::{ConfigManager, TaskmanConfig};
pub use error::{Result, TaskmanError};
pub use logging::{init_structured_logging, init_tracing};
pub use models::{NewTask, RequestContext, SubjectRef, Task, TaskId};
pub use orchestration::{
    StageData, TaskCallback, TaskHandle, TaskManager, TaskRuntime, TaskmanSystem,
};
pub use registry::{HandlerSet, StageHandler};
pub use state_machine::TaskState;
pub use store::{InMemoryTaskStore, TaskStore};
