//! PostgreSQL implementation of TaskStore
//!
//! Persistence for multi-process deployments:
//! - Claiming with `FOR UPDATE SKIP LOCKED` plus a status-guarded update
//! - Conditional terminal transitions (`WHERE status = 'in_progress'`)
//! - Schema in `sql/compute_tasks.sql`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::executor::Outcome;
use crate::task::{PayloadRef, Task, TaskId, TaskStatus};

/// Column list shared by every query returning whole tasks
const TASK_COLUMNS: &str = "id, status, payload, submitted_at, started_at, completed_at, \
                            worker_id, error, cancel_requested";

/// PostgreSQL implementation of TaskStore
///
/// Several engine processes may share one database; claim exclusivity holds
/// across all of them.
///
/// # Example
///
/// ```ignore
/// use compute_engine::PostgresTaskStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/compute").await?;
/// let store = PostgresTaskStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_task(&self, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM compute_tasks WHERE id = $1"
        ))
        .bind(task_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load task: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.as_ref().map(task_from_row).transpose()
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self))]
    async fn enqueue(&self, payload: PayloadRef) -> Result<TaskId, StoreError> {
        let task_id = TaskId::new();

        sqlx::query(
            r#"
            INSERT INTO compute_tasks (id, status, payload, submitted_at)
            VALUES ($1, 'pending', $2, NOW())
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(payload.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to enqueue task: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(%task_id, "enqueued task");
        Ok(task_id)
    }

    #[instrument(skip(self))]
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>, StoreError> {
        // The CTE locks one pending row and skips rows locked by concurrent
        // claimers; the outer status guard makes the transition conditional.
        let row = sqlx::query(&format!(
            r#"
            WITH claimable AS (
                SELECT id
                FROM compute_tasks
                WHERE status = 'pending'
                ORDER BY submitted_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE compute_tasks t
            SET status = 'in_progress',
                worker_id = $1,
                started_at = GREATEST(NOW(), t.submitted_at)
            FROM claimable c
            WHERE t.id = c.id AND t.status = 'pending'
            RETURNING {}
            "#,
            qualified_columns("t")
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim task: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let task = row.as_ref().map(task_from_row).transpose()?;
        if let Some(task) = &task {
            debug!(task_id = %task.id, worker_id, "claimed task");
        }
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn complete(
        &self,
        task_id: TaskId,
        worker_id: &str,
        outcome: Outcome,
    ) -> Result<Task, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE compute_tasks
            SET status = $3,
                error = $4,
                completed_at = GREATEST(NOW(), COALESCE(started_at, submitted_at))
            WHERE id = $1 AND worker_id = $2 AND status = 'in_progress'
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id.as_uuid())
        .bind(worker_id)
        .bind(outcome.status().as_str())
        .bind(outcome.detail())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to complete task: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if let Some(row) = row {
            let task = task_from_row(&row)?;
            debug!(%task_id, worker_id, status = %task.status, "completed task");
            return Ok(task);
        }

        // Nothing updated: report why, leaving the row untouched
        let current = self
            .fetch_task(task_id)
            .await?
            .ok_or(StoreError::TaskNotFound(task_id))?;

        if current.status != TaskStatus::InProgress {
            Err(StoreError::Conflict {
                task_id,
                operation: "complete",
                actual: current.status,
            })
        } else {
            Err(StoreError::NotOwner {
                task_id,
                worker_id: worker_id.to_string(),
                owner: current.worker_id,
            })
        }
    }

    #[instrument(skip(self))]
    async fn cancel(&self, task_id: TaskId) -> Result<CancelOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let row = sqlx::query("SELECT status FROM compute_tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::TaskNotFound(task_id))?;

        let status = parse_status(row.get("status"))?;

        let outcome = match status {
            TaskStatus::Pending => {
                sqlx::query(
                    r#"
                    UPDATE compute_tasks
                    SET status = 'canceled',
                        cancel_requested = TRUE,
                        completed_at = GREATEST(NOW(), submitted_at)
                    WHERE id = $1
                    "#,
                )
                .bind(task_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
                CancelOutcome::Canceled
            }
            TaskStatus::InProgress => {
                sqlx::query("UPDATE compute_tasks SET cancel_requested = TRUE WHERE id = $1")
                    .bind(task_id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?;
                CancelOutcome::Requested
            }
            TaskStatus::Canceled => CancelOutcome::AlreadyCanceled,
            actual @ (TaskStatus::Success | TaskStatus::Failed) => {
                return Err(StoreError::Conflict {
                    task_id,
                    operation: "cancel",
                    actual,
                });
            }
        };

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(%task_id, ?outcome, "cancel request handled");
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn is_cancel_requested(&self, task_id: TaskId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT cancel_requested FROM compute_tasks WHERE id = $1")
            .bind(task_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to read cancellation flag: {}", e);
                StoreError::Database(e.to_string())
            })?
            .ok_or(StoreError::TaskNotFound(task_id))?;

        Ok(row.get("cancel_requested"))
    }

    #[instrument(skip(self))]
    async fn get(&self, task_id: TaskId) -> Result<Task, StoreError> {
        self.fetch_task(task_id)
            .await?
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        filter: TaskFilter,
        pagination: Pagination,
    ) -> Result<Vec<Task>, StoreError> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {TASK_COLUMNS} FROM compute_tasks WHERE 1=1"
        ));

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(worker_id) = filter.worker_id {
            query.push(" AND worker_id = ").push_bind(worker_id);
        }

        query
            .push(" ORDER BY submitted_at, id LIMIT ")
            .push_bind(i64::from(pagination.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(pagination.offset));

        let rows = query.build().fetch_all(&self.pool).await.map_err(|e| {
            error!("Failed to list tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(task_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn snapshot_counts(&self) -> Result<TaskCounts, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM compute_tasks
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let mut counts = TaskCounts::default();
        for row in rows {
            let status = parse_status(row.get("status"))?;
            let count: i64 = row.get("count");
            counts.add(status, count as usize);
        }
        Ok(counts)
    }

    #[instrument(skip(self))]
    async fn requeue_stale(&self, threshold: Duration) -> Result<Vec<TaskId>, StoreError> {
        let Some(cutoff) = stale_cutoff(Utc::now(), threshold) else {
            return Ok(vec![]);
        };

        // Tasks with an accepted cancellation request end as canceled
        let rows = sqlx::query(
            r#"
            UPDATE compute_tasks
            SET status = CASE WHEN cancel_requested THEN 'canceled' ELSE 'pending' END,
                worker_id = CASE WHEN cancel_requested THEN worker_id END,
                started_at = CASE WHEN cancel_requested THEN started_at END,
                completed_at = CASE
                    WHEN cancel_requested THEN GREATEST(NOW(), started_at)
                END
            WHERE status = 'in_progress'
              AND started_at < $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to reclaim stale tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let reclaimed: Vec<TaskId> = rows
            .iter()
            .map(|r| TaskId::from_uuid(r.get("id")))
            .collect();

        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "reclaimed stale tasks");
        }

        Ok(reclaimed)
    }
}

// Helper functions

fn qualified_columns(alias: &str) -> String {
    TASK_COLUMNS
        .split(',')
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let id: Uuid = row.get("id");
    let status: &str = row.get("status");
    let payload: String = row.get("payload");

    Ok(Task {
        id: TaskId::from_uuid(id),
        status: parse_status(status)?,
        payload: PayloadRef::new(payload),
        submitted_at: row.get::<DateTime<Utc>, _>("submitted_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        worker_id: row.get("worker_id"),
        error: row.get("error"),
        cancel_requested: row.get("cancel_requested"),
    })
}

fn parse_status(status: &str) -> Result<TaskStatus, StoreError> {
    TaskStatus::parse(status)
        .ok_or_else(|| StoreError::Serialization(format!("unknown task status: {}", status)))
}
