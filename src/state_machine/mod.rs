//! # Task State Machine
//!
//! Status and stage transitions for tasks. Every transition is persisted
//! through the [`TaskStore`](crate::store::TaskStore) before its actions
//! (lifecycle event, ops-log entry, failure notification) run.
//!
//! ```text
//! pending --Start--> running --Stage--> running
//!    |                  |
//!    +------Fail--------+--Complete--> complete
//!                       +--Fail------> failed
//! ```

pub mod actions;
pub mod errors;
pub mod events;
pub mod states;
pub mod task_state_machine;

pub use actions::{
    FailureNotificationAction, OpsLogAction, PublishTransitionEventAction, StateAction,
    TransitionActions,
};
pub use errors::{StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use states::TaskState;
pub use task_state_machine::TaskStateMachine;
