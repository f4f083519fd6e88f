//! # Registry
//!
//! Task type registration and stage handler resolution.

pub mod task_type_registry;

pub use task_type_registry::{
    HandlerSet, MethodHandler, MethodStages, StageFuture, StageHandler, StageMethod,
    TaskTypeRegistry,
};
