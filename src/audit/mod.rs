//! # Audit Trail
//!
//! Ops-log entries and failure notifications emitted on task transitions.
//!
//! Both sinks are synchronous, non-blocking traits: a transition never waits on
//! an audit backend. [`BufferedOpsLog`] decouples slow backends with a small
//! bounded queue drained by one background task; when the queue is full the
//! entry is dropped with a warning.

pub mod notifier;
pub mod ops_log;

pub use notifier::{FailureNotification, Notifier, TracingNotifier};
pub use ops_log::{BufferedOpsLog, NoopOpsLog, OpsLog, OpsLogEntry, TracingOpsLog};
