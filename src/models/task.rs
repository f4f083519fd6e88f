//! # Task Model
//!
//! One in-flight or completed orchestration instance.
//!
//! ## Overview
//!
//! A `Task` carries everything the engine needs to resume work after an
//! arbitrarily long suspension: the registered type that selects its handler
//! set, an opaque reference to the subject resource, the open `params` payload,
//! the name of the next continuation, its status and an optional weak link to a
//! parent task that waits for it.
//!
//! ## Params
//!
//! `params` is always a JSON object. Data passed to `set_stage` is shallow-merged
//! into it; no history is kept, only the current value.

use crate::error::{Result, TaskmanError};
use crate::state_machine::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type TaskId = Uuid;

/// Reference to the domain object a task acts on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    /// Resource kind, e.g. `disk`, `guest`, `elasticip`
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SubjectRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name for display, falling back to `-` like the ops log does.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("-")
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Identity and request metadata of whoever initiated the task.
///
/// Carried opaquely so handlers can make further authorized calls on behalf of
/// the original caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub domain_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Context used by background sweeps that act on behalf of the system.
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            user_name: "system".to_string(),
            roles: vec!["admin".to_string()],
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Persisted task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub subject: SubjectRef,
    pub params: Value,
    /// Next continuation; empty before the first run
    pub stage: String,
    pub status: TaskState,
    pub parent_id: Option<TaskId>,
    pub request_context: RequestContext,
    /// Failure reason once `status` is `failed`
    pub reason: Option<String>,
    /// Completion payload once `status` is `complete`
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(Value::as_i64)
    }

    /// Boolean flag lookup that also accepts `"true"`/`"false"` strings.
    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        match self.params.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => default,
        }
    }
}

/// Request to create a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: String,
    pub subject: SubjectRef,
    pub request_context: RequestContext,
    pub params: Value,
    pub parent_id: Option<TaskId>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            task_type: task_type.into(),
            subject,
            request_context: RequestContext::default(),
            params: Value::Object(Map::new()),
            parent_id: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_request_context(mut self, request_context: RequestContext) -> Self {
        self.request_context = request_context;
        self
    }

    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Materialize a pending task with a fresh id.
    pub fn into_task(self) -> Result<Task> {
        let params = match self.params {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(TaskmanError::ValidationError(format!(
                    "task params must be a JSON object, got {other}"
                )))
            }
        };
        let now = Utc::now();
        Ok(Task {
            id: Uuid::new_v4(),
            task_type: self.task_type,
            subject: self.subject,
            params,
            stage: String::new(),
            status: TaskState::Pending,
            parent_id: self.parent_id,
            request_context: self.request_context,
            reason: None,
            result: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Shallow-merge `patch` into the `params` object.
///
/// `null` leaves params untouched; anything other than an object is rejected.
pub fn merge_params(params: &mut Value, patch: Value) -> Result<()> {
    let patch = match patch {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        other => {
            return Err(TaskmanError::ValidationError(format!(
                "stage data must be a JSON object, got {other}"
            )))
        }
    };
    if !params.is_object() {
        *params = Value::Object(Map::new());
    }
    if let Value::Object(target) = params {
        for (key, value) in patch {
            target.insert(key, value);
        }
    }
    Ok(())
}
