//! Postgres task store against a live database.
//!
//! Needs `DATABASE_URL`; run with `cargo test --test pg_task_store_test -- --ignored`.
#![cfg(feature = "postgres")]

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use taskman_core::models::{NewTask, RequestContext, SubjectRef, Task};
use taskman_core::state_machine::TaskState;
use taskman_core::store::{PgTaskStore, StoreError, TaskStore};
use uuid::Uuid;

fn disk_task(disk: &str) -> Task {
    NewTask::new("DiskDeleteTask", SubjectRef::new("disk", disk).with_name("data"))
        .with_params(json!({ "purge": false }))
        .with_request_context(RequestContext::new("u-1", "p-1"))
        .into_task()
        .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_insert_and_load(pool: PgPool) -> sqlx::Result<()> {
    let store = PgTaskStore::new(pool);
    let task = disk_task("d-1");
    store.insert(&task).await.unwrap();

    let loaded = store.load(task.id).await.unwrap();
    assert_eq!(loaded.task_type, "DiskDeleteTask");
    assert_eq!(loaded.subject, task.subject);
    assert_eq!(loaded.params, json!({ "purge": false }));
    assert_eq!(loaded.status, TaskState::Pending);
    assert_eq!(loaded.request_context.project_id, "p-1");
    assert!(loaded.parent_id.is_none());

    assert!(matches!(
        store.insert(&task).await,
        Err(StoreError::Duplicate(id)) if id == task.id
    ));
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_stage_and_status_updates(pool: PgPool) -> sqlx::Result<()> {
    let store = PgTaskStore::new(pool);
    let task = disk_task("d-1");
    store.insert(&task).await.unwrap();

    store
        .update_status(task.id, TaskState::Pending, TaskState::Running, None, None)
        .await
        .unwrap();
    store
        .update_stage(
            task.id,
            "OnDeallocateComplete",
            &json!({ "purge": false, "host_id": "host-1" }),
        )
        .await
        .unwrap();
    store
        .update_status(
            task.id,
            TaskState::Running,
            TaskState::Failed,
            Some("host offline"),
            Some(&json!({ "attempts": 1 })),
        )
        .await
        .unwrap();

    let loaded = store.load(task.id).await.unwrap();
    assert_eq!(loaded.stage, "OnDeallocateComplete");
    assert_eq!(loaded.param_str("host_id"), Some("host-1"));
    assert_eq!(loaded.status, TaskState::Failed);
    assert_eq!(loaded.reason.as_deref(), Some("host offline"));
    assert_eq!(loaded.result, Some(json!({ "attempts": 1 })));
    assert!(loaded.updated_at >= loaded.created_at);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_status_write_requires_expected_status(pool: PgPool) -> sqlx::Result<()> {
    let store = PgTaskStore::new(pool);
    let task = disk_task("d-1");
    store.insert(&task).await.unwrap();

    store
        .update_status(task.id, TaskState::Pending, TaskState::Running, None, None)
        .await
        .unwrap();
    assert!(matches!(
        store
            .update_status(task.id, TaskState::Pending, TaskState::Running, None, None)
            .await,
        Err(StoreError::StatusConflict { actual: TaskState::Running, .. })
    ));

    store
        .update_status(task.id, TaskState::Running, TaskState::Failed, Some("gone"), None)
        .await
        .unwrap();
    assert!(matches!(
        store
            .update_status(task.id, TaskState::Pending, TaskState::Running, None, None)
            .await,
        Err(StoreError::StatusConflict { actual: TaskState::Failed, .. })
    ));
    assert_eq!(store.load(task.id).await.unwrap().status, TaskState::Failed);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_missing_rows_are_not_found(pool: PgPool) -> sqlx::Result<()> {
    let store = PgTaskStore::new(pool);
    let id = Uuid::new_v4();

    assert!(matches!(store.load(id).await, Err(StoreError::NotFound(_))));
    assert!(matches!(
        store.update_stage(id, "OnInit", &json!({})).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store
            .update_status(id, TaskState::Running, TaskState::Failed, Some("gone"), None)
            .await,
        Err(StoreError::NotFound(_))
    ));
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_listing_queries(pool: PgPool) -> sqlx::Result<()> {
    let store = PgTaskStore::new(pool);
    let started = Utc::now() - Duration::seconds(1);

    let parent = NewTask::new("GuestDeleteTask", SubjectRef::new("guest", "g-1"))
        .into_task()
        .unwrap();
    store.insert(&parent).await.unwrap();
    let mut children = Vec::new();
    for disk in ["d-1", "d-2"] {
        let child = NewTask::new("DiskDeleteTask", SubjectRef::new("disk", disk))
            .with_parent(parent.id)
            .into_task()
            .unwrap();
        store.insert(&child).await.unwrap();
        children.push(child.id);
    }

    let found: Vec<_> = store
        .find_by_parent(parent.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(found.len(), 2);
    assert!(children.iter().all(|id| found.contains(id)));

    store
        .update_status(parent.id, TaskState::Pending, TaskState::Running, None, None)
        .await
        .unwrap();
    let running = store.find_by_status(TaskState::Running, None).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, parent.id);
    assert!(store
        .find_by_status(TaskState::Running, Some(started))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .find_by_status(TaskState::Pending, Some(Utc::now() + Duration::seconds(5)))
            .await
            .unwrap()
            .len(),
        2
    );

    assert_eq!(store.find_created_since(started).await.unwrap().len(), 3);
    assert!(store
        .find_created_since(Utc::now() + Duration::seconds(5))
        .await
        .unwrap()
        .is_empty());
    Ok(())
}
