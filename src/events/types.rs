//! Lifecycle event names published on the [`EventPublisher`](super::EventPublisher).

pub const TASK_CREATED: &str = "task.created";
pub const TASK_STARTED: &str = "task.started";
pub const TASK_STAGE_SET: &str = "task.stage_set";
pub const TASK_STAGE_INVOKED: &str = "task.stage_invoked";
pub const TASK_COMPLETED: &str = "task.completed";
pub const TASK_FAILED: &str = "task.failed";
/// Late or duplicate callback dropped at ingress or under serialization
pub const TASK_CALLBACK_DISCARDED: &str = "task.callback_discarded";

/// All lifecycle event names, in lifecycle order
pub const ALL: [&str; 7] = [
    TASK_CREATED,
    TASK_STARTED,
    TASK_STAGE_SET,
    TASK_STAGE_INVOKED,
    TASK_COMPLETED,
    TASK_FAILED,
    TASK_CALLBACK_DISCARDED,
];

/// Whether `name` marks the end of a task's lifecycle
pub fn is_terminal_event(name: &str) -> bool {
    name == TASK_COMPLETED || name == TASK_FAILED
}
