//! # Lifecycle Events
//!
//! In-process broadcast of task lifecycle events. Every persisted transition
//! publishes one event; the dispatcher additionally publishes
//! `task.stage_invoked` and `task.callback_discarded`.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishedEvent};
