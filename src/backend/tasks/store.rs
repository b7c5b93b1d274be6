/**
 * Task Store
 *
 * Durable task records in SQLite. The store is deliberately dumb: it knows
 * nothing about executors or documents, only how to persist tasks and how
 * to apply the few state transitions the orchestrator needs.
 *
 * # Guarded transitions
 *
 * `touch`, `record_retry` and `resolve` only affect rows that are not yet
 * terminal, and report whether a row was changed. A task resolved by a
 * webhook while a poll pass is in flight is therefore never resolved twice.
 */

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::backend::persistence::{from_millis, to_millis, StorageError};
use crate::shared::task::{CompletionMode, Task, TaskStatus, TaskType};

const TASK_COLUMNS: &str = r#"
    id, document_id, node_id, task_type, provider, completion_mode, status,
    external_ref, params, result_url, result_data, error, retry_count,
    max_retries, next_poll_at, created_at, updated_at, completed_at
"#;

/// Fields written when a task reaches a terminal state
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub status: TaskStatus,
    pub result_url: Option<String>,
    pub result_data: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, task: &Task) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, document_id, node_id, task_type, provider, completion_mode, status,
                external_ref, params, result_url, result_data, error, retry_count,
                max_retries, next_poll_at, created_at, updated_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.document_id)
        .bind(&task.node_id)
        .bind(task.task_type.as_str())
        .bind(&task.provider)
        .bind(task.completion_mode.as_str())
        .bind(task.status.as_str())
        .bind(&task.external_ref)
        .bind(task.params.to_string())
        .bind(&task.result_url)
        .bind(task.result_data.as_ref().map(Value::to_string))
        .bind(&task.error)
        .bind(task.retry_count as i64)
        .bind(task.max_retries as i64)
        .bind(task.next_poll_at.map(to_millis))
        .bind(to_millis(task.created_at))
        .bind(to_millis(task.updated_at))
        .bind(task.completed_at.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// All tasks of a document, oldest first
    pub async fn list_for_document(&self, document_id: &str) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE document_id = ? ORDER BY created_at ASC, id ASC",
            TASK_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Outstanding poll-mode tasks whose next poll is due at `now`.
    ///
    /// Tasks created before `created_after` are out of horizon and skipped.
    pub async fn list_due_for_polling(
        &self,
        document_id: &str,
        now: DateTime<Utc>,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM tasks
            WHERE document_id = ?
              AND status IN ('pending', 'generating')
              AND completion_mode = 'poll'
              AND external_ref IS NOT NULL
              AND created_at >= ?
              AND (next_poll_at IS NULL OR next_poll_at <= ?)
            ORDER BY created_at ASC, id ASC
            "#,
            TASK_COLUMNS
        ))
        .bind(document_id)
        .bind(to_millis(created_after))
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Number of in-horizon poll-mode tasks still waiting on their provider
    pub async fn count_outstanding_polling(
        &self,
        document_id: &str,
        created_after: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM tasks
            WHERE document_id = ?
              AND status IN ('pending', 'generating')
              AND completion_mode = 'poll'
              AND external_ref IS NOT NULL
              AND created_at >= ?
            "#,
        )
        .bind(document_id)
        .bind(to_millis(created_after))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }

    /// Documents that still have in-horizon poll-mode tasks outstanding
    pub async fn documents_with_outstanding_polling(
        &self,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<String>, StorageError> {
        let documents: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT document_id
            FROM tasks
            WHERE status IN ('pending', 'generating')
              AND completion_mode = 'poll'
              AND external_ref IS NOT NULL
              AND created_at >= ?
            ORDER BY document_id ASC
            "#,
        )
        .bind(to_millis(created_after))
        .fetch_all(&self.pool)
        .await?;
        Ok(documents)
    }

    /// Most recent task with the given provider reference
    pub async fn find_by_external_ref(
        &self,
        provider: &str,
        external_ref: &str,
    ) -> Result<Option<Task>, StorageError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM tasks
            WHERE provider = ? AND external_ref = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            TASK_COLUMNS
        ))
        .bind(provider)
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Record a still-running observation and schedule the next poll
    pub async fn touch(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        next_poll_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET updated_at = ?, next_poll_at = ?
            WHERE id = ? AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(to_millis(now))
        .bind(next_poll_at.map(to_millis))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a transient failure
    pub async fn record_retry(
        &self,
        id: Uuid,
        retry_count: u32,
        error: &str,
        now: DateTime<Utc>,
        next_poll_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET retry_count = ?, error = ?, updated_at = ?, next_poll_at = ?
            WHERE id = ? AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(retry_count as i64)
        .bind(error)
        .bind(to_millis(now))
        .bind(to_millis(next_poll_at))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a task to a terminal state; false when it already was terminal
    pub async fn resolve(
        &self,
        id: Uuid,
        resolution: &Resolution,
        retry_count: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?,
                result_url = ?,
                result_data = ?,
                error = ?,
                retry_count = COALESCE(?, retry_count),
                next_poll_at = NULL,
                updated_at = ?,
                completed_at = ?
            WHERE id = ? AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(resolution.status.as_str())
        .bind(&resolution.result_url)
        .bind(resolution.result_data.as_ref().map(Value::to_string))
        .bind(&resolution.error)
        .bind(retry_count.map(|n| n as i64))
        .bind(to_millis(now))
        .bind(to_millis(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StorageError> {
    let corrupt = |field: &str, detail: String| StorageError::Corrupt(format!("tasks.{}: {}", field, detail));

    let id: String = row.try_get("id")?;
    let task_type: String = row.try_get("task_type")?;
    let completion_mode: String = row.try_get("completion_mode")?;
    let status: String = row.try_get("status")?;
    let params: String = row.try_get("params")?;
    let result_data: Option<String> = row.try_get("result_data")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let max_retries: i64 = row.try_get("max_retries")?;
    let next_poll_at: Option<i64> = row.try_get("next_poll_at")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;

    Ok(Task {
        id: Uuid::parse_str(&id).map_err(|e| corrupt("id", e.to_string()))?,
        document_id: row.try_get("document_id")?,
        node_id: row.try_get("node_id")?,
        task_type: task_type
            .parse::<TaskType>()
            .map_err(|e| corrupt("task_type", e.to_string()))?,
        provider: row.try_get("provider")?,
        completion_mode: completion_mode
            .parse::<CompletionMode>()
            .map_err(|e| corrupt("completion_mode", e.to_string()))?,
        status: status
            .parse::<TaskStatus>()
            .map_err(|e| corrupt("status", e.to_string()))?,
        external_ref: row.try_get("external_ref")?,
        params: serde_json::from_str(&params).map_err(|e| corrupt("params", e.to_string()))?,
        result_url: row.try_get("result_url")?,
        result_data: result_data
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| corrupt("result_data", e.to_string()))?,
        error: row.try_get("error")?,
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        next_poll_at: next_poll_at.map(from_millis),
        created_at: from_millis(created_at),
        updated_at: from_millis(updated_at),
        completed_at: completed_at.map(from_millis),
    })
}
