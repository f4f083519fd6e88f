// Test Helpers Module - in-process fakes for exercising the engine
//
// Recording audit sinks, an in-memory compute repository and scripted
// provider drivers, plus a polling helper for waiting on task state.

pub mod compute;
pub mod drivers;
pub mod recording;

pub use compute::InMemoryCompute;
pub use drivers::{DriverCall, ScriptedHostDriver, ScriptedRegionDriver, ScriptedReply};
pub use recording::{RecordingNotifier, RecordingOpsLog};

use crate::error::{Result, TaskmanError};
use crate::models::{Task, TaskId};
use crate::orchestration::TaskManager;
use std::time::Duration;
use tokio::time::Instant;

/// Poll `task_id` until `predicate` holds or `timeout` elapses
pub async fn wait_for_task<F>(
    manager: &TaskManager,
    task_id: TaskId,
    predicate: F,
    timeout: Duration,
) -> Result<Task>
where
    F: Fn(&Task) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let task = manager.get_task(task_id).await?;
        if predicate(&task) {
            return Ok(task);
        }
        if Instant::now() >= deadline {
            return Err(TaskmanError::Timeout(format!(
                "task {task_id} did not reach the expected state (status {}, stage '{}')",
                task.status, task.stage
            )));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
