//! # Orchestration Engine
//!
//! Staged execution of long-running tasks.
//!
//! ## Core Components
//!
//! - **TaskManager**: task factory, handler registry and the ingress for runs,
//!   resumes and callbacks
//! - **WorkerPool**: bounded workers with a FIFO mailbox per task id
//! - **StageDispatcher**: resolves and invokes the handler for the recorded stage
//! - **TaskRuntime**: what a handler sees while it runs; owns the transitions
//! - **CompletionPropagator**: resumes a waiting parent when a child finishes
//! - **TaskCallback / DriverOutcome**: the contract for asynchronous driver work
//! - **TaskSupervisor**: staleness and retry sweeps
//! - **TaskmanSystem**: bootstrap from configuration
//!
//! ## Stage Flow
//!
//! ```text
//! start_task ──► pending ──Start──► running(OnInit) ──set_stage──► running(OnX)
//!                                        │                              │
//!                                        │                callback / child outcome
//!                                        ▼                              ▼
//!                           set_stage_complete / set_stage_failed ◄── OnX handler
//!                                        │
//!                                        └──► CompletionPropagator ──► parent resume
//! ```

pub mod bootstrap;
mod dispatcher;
pub mod driver;
pub mod propagator;
pub mod runtime;
pub mod supervisor;
pub mod task_manager;
pub mod worker_pool;

pub use bootstrap::TaskmanSystem;
pub use driver::{call_with_timeout, DriverError, DriverOutcome, TaskCallback};
pub use propagator::CompletionPropagator;
pub use runtime::{ChildOutcome, StageData, StageTransition, TaskRuntime};
pub use supervisor::{SupervisorHandle, SweepReport, TaskSupervisor};
pub use task_manager::{TaskHandle, TaskManager, TaskManagerBuilder};
pub use worker_pool::{PoolStats, WorkItem, WorkKind, WorkerPool};
