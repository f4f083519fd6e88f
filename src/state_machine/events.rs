//! # State Machine Events
//!
//! Events that trigger task status and stage transitions.
//!
//! | Event | Description |
//! |-------|-------------|
//! | `Start` | First run scheduled (`pending -> running`) |
//! | `Stage` | Next continuation recorded, params merged (`running -> running`) |
//! | `Complete` | Task finished successfully |
//! | `Fail` | Task finished with a reason |
//!
//! Events provide metadata via helper methods:
//! - `event_type()` - String name for logging
//! - `is_terminal()` - Whether this completes the task lifecycle
//! - `error_message()` - Extract failure reason from `Fail`

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events that can trigger task state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Schedule the first run
    Start,
    /// Record the next continuation and merge `data` into params
    Stage { stage: String, data: Option<Value> },
    /// Finish successfully with an optional result payload
    Complete(Option<Value>),
    /// Finish with a failure reason
    Fail(String),
}

impl TaskEvent {
    /// Get the event type as a string for logging/debugging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stage { .. } => "stage",
            Self::Complete(_) => "complete",
            Self::Fail(_) => "fail",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Fail(_))
    }

    pub fn stage(stage: impl Into<String>, data: Option<Value>) -> Self {
        Self::Stage {
            stage: stage.into(),
            data,
        }
    }
}
