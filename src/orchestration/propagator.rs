//! # Completion Propagator
//!
//! Resumes a waiting parent when one of its children reaches a terminal state.
//!
//! Exactly one resume is enqueued per child terminal transition. The resume
//! goes through the parent's mailbox, so resumes from several children are
//! handled one at a time and in the order they were enqueued. The parent link
//! is weak: a parent that no longer exists, or is already terminal, is simply
//! not notified.

use super::runtime::{ChildOutcome, StageData};
use super::task_manager::TaskManager;
use crate::models::Task;
use crate::store::StoreError;
use tracing::{debug, error, info};

pub struct CompletionPropagator;

impl CompletionPropagator {
    pub async fn propagate(manager: &TaskManager, child: &Task) {
        let Some(parent_id) = child.parent_id else {
            return;
        };
        if !child.is_terminal() {
            return;
        }

        let parent = match manager.store().load(parent_id).await {
            Ok(parent) => parent,
            Err(StoreError::NotFound(_)) => {
                info!(
                    task_id = %child.id,
                    parent_id = %parent_id,
                    "🔗 PROPAGATE: Parent no longer exists, nothing to notify"
                );
                return;
            }
            Err(e) => {
                error!(
                    task_id = %child.id,
                    parent_id = %parent_id,
                    error = %e,
                    "❌ PROPAGATE: Failed to load parent task"
                );
                return;
            }
        };

        if parent.is_terminal() {
            info!(
                task_id = %child.id,
                parent_id = %parent_id,
                parent_status = %parent.status,
                "🔗 PROPAGATE: Parent already terminal, nothing to notify"
            );
            return;
        }

        let outcome = ChildOutcome::from_task(child);
        debug!(
            task_id = %child.id,
            parent_id = %parent_id,
            parent_stage = %parent.stage,
            succeeded = outcome.succeeded,
            "🔗 PROPAGATE: Resuming parent with child outcome"
        );
        if let Err(e) = manager.resume_detached(parent_id, StageData::from_child(outcome)) {
            error!(
                task_id = %child.id,
                parent_id = %parent_id,
                error = %e,
                "❌ PROPAGATE: Failed to enqueue parent resume"
            );
        }
    }
}
