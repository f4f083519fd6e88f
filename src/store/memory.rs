use super::{StoreError, StoreResult, TaskStore};
use crate::models::{Task, TaskId};
use crate::state_machine::TaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

/// In-process task store for tests and single-node deployments
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop a row outright, as an operator purge would.
    pub fn remove(&self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id).map(|(_, task)| task)
    }

    fn collect_sorted(&self, filter: impl Fn(&Task) -> bool) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> StoreResult<()> {
        use dashmap::mapref::entry::Entry;
        match self.tasks.entry(task.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(task.id)),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                Ok(())
            }
        }
    }

    async fn load(&self, id: TaskId) -> StoreResult<Task> {
        self.tasks
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_stage(&self, id: TaskId, stage: &str, params: &Value) -> StoreResult<()> {
        let mut task = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        task.stage = stage.to_string();
        task.params = params.clone();
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(
        &self,
        id: TaskId,
        from: TaskState,
        to: TaskState,
        reason: Option<&str>,
        result: Option<&Value>,
    ) -> StoreResult<()> {
        let mut task = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if task.status != from {
            return Err(StoreError::StatusConflict {
                id,
                expected: from,
                actual: task.status,
            });
        }
        task.status = to;
        if let Some(reason) = reason {
            task.reason = Some(reason.to_string());
        }
        if let Some(result) = result {
            task.result = Some(result.clone());
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_parent(&self, parent_id: TaskId) -> StoreResult<Vec<Task>> {
        Ok(self.collect_sorted(|t| t.parent_id == Some(parent_id)))
    }

    async fn find_by_status(
        &self,
        status: TaskState,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Task>> {
        Ok(self.collect_sorted(|t| {
            t.status == status && updated_before.map_or(true, |cutoff| t.updated_at < cutoff)
        }))
    }

    async fn find_created_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        Ok(self.collect_sorted(|t| t.created_at >= since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, SubjectRef};
    use chrono::Duration;
    use serde_json::json;

    fn task(parent: Option<TaskId>) -> Task {
        let mut new_task = NewTask::new("DiskDeleteTask", SubjectRef::new("disk", "d-1"));
        if let Some(parent) = parent {
            new_task = new_task.with_parent(parent);
        }
        new_task.into_task().unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = InMemoryTaskStore::new();
        let t = task(None);
        store.insert(&t).await.unwrap();
        assert_eq!(store.load(t.id).await.unwrap(), t);
        assert!(matches!(
            store.insert(&t).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let store = InMemoryTaskStore::new();
        let id = uuid::Uuid::new_v4();
        assert!(matches!(store.load(id).await, Err(StoreError::NotFound(i)) if i == id));
        assert!(store.update_stage(id, "OnInit", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_update_status_keeps_reason() {
        let store = InMemoryTaskStore::new();
        let t = task(None);
        store.insert(&t).await.unwrap();
        store
            .update_status(t.id, TaskState::Pending, TaskState::Failed, Some("boom"), None)
            .await
            .unwrap();
        let loaded = store.load(t.id).await.unwrap();
        assert_eq!(loaded.status, TaskState::Failed);
        assert_eq!(loaded.reason.as_deref(), Some("boom"));
        assert!(loaded.updated_at >= t.updated_at);
    }

    #[tokio::test]
    async fn test_update_status_rejects_stale_expected_status() {
        let store = InMemoryTaskStore::new();
        let t = task(None);
        store.insert(&t).await.unwrap();
        store
            .update_status(t.id, TaskState::Pending, TaskState::Running, None, None)
            .await
            .unwrap();

        let err = store
            .update_status(t.id, TaskState::Pending, TaskState::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StatusConflict { expected: TaskState::Pending, actual: TaskState::Running, .. }
        ));

        store
            .update_status(t.id, TaskState::Running, TaskState::Failed, Some("gone"), None)
            .await
            .unwrap();
        assert!(store
            .update_status(t.id, TaskState::Pending, TaskState::Running, None, None)
            .await
            .is_err());
        assert_eq!(store.load(t.id).await.unwrap().status, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_queries() {
        let store = InMemoryTaskStore::new();
        let parent = task(None);
        let child_a = task(Some(parent.id));
        let child_b = task(Some(parent.id));
        for t in [&parent, &child_a, &child_b] {
            store.insert(t).await.unwrap();
        }

        let children = store.find_by_parent(parent.id).await.unwrap();
        assert_eq!(children.len(), 2);

        let pending = store
            .find_by_status(TaskState::Pending, None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 3);

        let stale = store
            .find_by_status(TaskState::Pending, Some(Utc::now() - Duration::hours(1)))
            .await
            .unwrap();
        assert!(stale.is_empty());

        let recent = store
            .find_created_since(Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(recent.len(), 3);

        assert!(store.remove(child_a.id).is_some());
        assert_eq!(store.len(), 2);
    }
}
