//! # Models
//!
//! Data types persisted by the task store.

pub mod task;

pub use task::{merge_params, NewTask, RequestContext, SubjectRef, Task, TaskId};
