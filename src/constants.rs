//! # Constants
//!
//! Well-known stage names, synthesized failure reasons and ops-log action names
//! used by the engine itself. Business task types define their own stage names
//! next to their handlers.

/// Stage invoked on the first run of every task type.
pub const ON_INIT: &str = "OnInit";

/// Suffix of the stage handler invoked when a callback reports failure.
pub const FAILED_STAGE_SUFFIX: &str = "Failed";

/// Failure reasons synthesized by the engine when a handler misbehaves.
pub mod reasons {
    pub const NO_TRANSITION: &str = "stage produced no transition";
    pub const HANDLER_PANICKED: &str = "stage handler panicked";
    pub const CALLBACK_FAILED: &str = "remote operation reported failure";
    pub const STALE_TASK: &str = "timeout: task made no progress";
}

/// Ops-log action names recorded for engine transitions.
pub mod actions {
    pub const TASK_START: &str = "task_start";
    pub const TASK_STAGE: &str = "task_stage";
    pub const TASK_COMPLETE: &str = "task_complete";
    pub const TASK_FAIL: &str = "task_fail";
}

/// Reserved params keys written by the engine or the supervisor.
pub mod params {
    pub const RETRY_OF: &str = "retry_of";
    pub const ATTEMPT: &str = "attempt";
}

/// Default engine sizing.
pub mod system {
    pub const DEFAULT_WORKER_COUNT: usize = 8;
    pub const DEFAULT_QUEUE_DEPTH: usize = 1024;
    pub const DEFAULT_EVENT_CAPACITY: usize = 1000;
    pub const DEFAULT_OPS_LOG_BUFFER: usize = 50;
}

/// Build the name of the failure continuation for `stage`.
pub fn failed_stage_name(stage: &str) -> String {
    format!("{stage}{FAILED_STAGE_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_stage_name() {
        assert_eq!(
            failed_stage_name("OnDeallocateComplete"),
            "OnDeallocateCompleteFailed"
        );
    }
}
