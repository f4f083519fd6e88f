use super::{StoreError, StoreResult, TaskStore};
use crate::config::DatabaseConfig;
use crate::models::{RequestContext, SubjectRef, Task, TaskId};
use crate::state_machine::TaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, task_type, subject_kind, subject_id, subject_name, params, \
     stage, status, parent_id, request_context, reason, result, created_at, updated_at";

/// Postgres-backed task store over the `taskman_tasks` table
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool described by `config`
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        info!(
            max_connections = config.max_connections,
            "🗄️ STORE: Initializing Postgres task store pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            size = pool.size(),
            "✅ STORE: Postgres task store pool ready"
        );
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_tasks(
        &self,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, TaskRow, sqlx::postgres::PgArguments>,
    ) -> StoreResult<Vec<Task>> {
        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    task_type: String,
    subject_kind: String,
    subject_id: String,
    subject_name: Option<String>,
    params: Value,
    stage: String,
    status: String,
    parent_id: Option<Uuid>,
    request_context: Value,
    reason: Option<String>,
    result: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status: TaskState = row.status.parse().map_err(|reason| StoreError::Corrupt {
            id: row.id,
            reason,
        })?;
        let request_context: RequestContext = serde_json::from_value(row.request_context)
            .map_err(|e| StoreError::Corrupt {
                id: row.id,
                reason: format!("request_context: {e}"),
            })?;

        Ok(Task {
            id: row.id,
            task_type: row.task_type,
            subject: SubjectRef {
                kind: row.subject_kind,
                id: row.subject_id,
                name: row.subject_name,
            },
            params: row.params,
            stage: row.stage,
            status,
            parent_id: row.parent_id,
            request_context,
            reason: row.reason,
            result: row.result,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert(&self, task: &Task) -> StoreResult<()> {
        let request_context = serde_json::to_value(&task.request_context)?;
        let result = sqlx::query(
            "INSERT INTO taskman_tasks (id, task_type, subject_kind, subject_id, subject_name, \
             params, stage, status, parent_id, request_context, reason, result, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(task.id)
        .bind(&task.task_type)
        .bind(&task.subject.kind)
        .bind(&task.subject.id)
        .bind(&task.subject.name)
        .bind(&task.params)
        .bind(&task.stage)
        .bind(task.status.as_str())
        .bind(task.parent_id)
        .bind(request_context)
        .bind(&task.reason)
        .bind(&task.result)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(task.id));
        }
        Ok(())
    }

    async fn load(&self, id: TaskId) -> StoreResult<Task> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM taskman_tasks WHERE id = $1");
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        Task::try_from(row)
    }

    async fn update_stage(&self, id: TaskId, stage: &str, params: &Value) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE taskman_tasks SET stage = $2, params = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(stage)
        .bind(params)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
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
        let outcome = sqlx::query(
            "UPDATE taskman_tasks SET status = $3, reason = COALESCE($4, reason), \
             result = COALESCE($5, result), updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(reason)
        .bind(result)
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            let actual = self.load(id).await?.status;
            return Err(StoreError::StatusConflict {
                id,
                expected: from,
                actual,
            });
        }
        Ok(())
    }

    async fn find_by_parent(&self, parent_id: TaskId) -> StoreResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM taskman_tasks WHERE parent_id = $1 ORDER BY created_at"
        );
        self.fetch_tasks(sqlx::query_as::<_, TaskRow>(&sql).bind(parent_id))
            .await
    }

    async fn find_by_status(
        &self,
        status: TaskState,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM taskman_tasks \
             WHERE status = $1 AND ($2::timestamptz IS NULL OR updated_at < $2) \
             ORDER BY created_at"
        );
        self.fetch_tasks(
            sqlx::query_as::<_, TaskRow>(&sql)
                .bind(status.as_str())
                .bind(updated_before),
        )
        .await
    }

    async fn find_created_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM taskman_tasks WHERE created_at >= $1 ORDER BY created_at"
        );
        self.fetch_tasks(sqlx::query_as::<_, TaskRow>(&sql).bind(since))
            .await
    }
}
