//! TaskStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::Outcome;
use crate::task::{PayloadRef, Task, TaskId, TaskStatus};

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Task is not in a status that allows the operation
    #[error("conflict: cannot {operation} task {task_id} in status {actual}")]
    Conflict {
        task_id: TaskId,
        operation: &'static str,
        actual: TaskStatus,
    },

    /// Task is in progress but held by another worker
    #[error("conflict: task {task_id} is not held by {worker_id} (owner: {owner:?})")]
    NotOwner {
        task_id: TaskId,
        worker_id: String,
        owner: Option<String>,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Another actor already resolved the task; callers log and move on
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::NotOwner { .. })
    }

    /// The store itself is failing; callers back off and retry
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Task was pending and is now canceled
    Canceled,

    /// Task is running; the advisory flag is set for the executor to observe
    Requested,

    /// Task was already canceled (repeat requests are not an error)
    AlreadyCanceled,
}

/// Point-in-time task counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl TaskCounts {
    /// Count one task in `status`
    pub fn record(&mut self, status: TaskStatus) {
        self.add(status, 1);
    }

    /// Count `n` tasks in `status`
    pub fn add(&mut self, status: TaskStatus, n: usize) {
        match status {
            TaskStatus::Pending => self.pending += n,
            TaskStatus::InProgress => self.in_progress += n,
            TaskStatus::Success => self.succeeded += n,
            TaskStatus::Failed => self.failed += n,
            TaskStatus::Canceled => self.canceled += n,
        }
    }

    /// Count for a single status
    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Success => self.succeeded,
            TaskStatus::Failed => self.failed,
            TaskStatus::Canceled => self.canceled,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.succeeded + self.failed + self.canceled
    }
}

/// Filter for listing tasks
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub worker_id: Option<String>,
}

impl TaskFilter {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            worker_id: None,
        }
    }

    pub fn with_worker(worker_id: impl Into<String>) -> Self {
        Self {
            status: None,
            worker_id: Some(worker_id.into()),
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(ref worker_id) = self.worker_id {
            if task.worker_id.as_ref() != Some(worker_id) {
                return false;
            }
        }
        true
    }
}

/// Pagination parameters
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// Persistent table of pending, in-progress and finished tasks
///
/// The store is the only shared mutable resource of the engine: claim
/// exclusivity is enforced here, by a single conditional transition, so that
/// worker loops never coordinate with each other directly.
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    // =========================================================================
    // Submission
    // =========================================================================

    /// Insert a new `Pending` task submitted now
    async fn enqueue(&self, payload: PayloadRef) -> Result<TaskId, StoreError>;

    // =========================================================================
    // Worker Operations
    // =========================================================================

    /// Atomically claim the oldest pending task for `worker_id`
    ///
    /// Oldest means lowest submission timestamp, then lowest identity.
    /// Returns `None` when nothing is pending. No two callers can ever
    /// receive the same task.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>, StoreError>;

    /// Record the terminal outcome of a task held by `worker_id`
    ///
    /// Fails with a conflict, leaving the task untouched, when the task is not
    /// `InProgress` or is held by another worker.
    async fn complete(
        &self,
        task_id: TaskId,
        worker_id: &str,
        outcome: Outcome,
    ) -> Result<Task, StoreError>;

    /// Cancel a pending task, or flag a running one for cooperative cancellation
    async fn cancel(&self, task_id: TaskId) -> Result<CancelOutcome, StoreError>;

    /// Read the advisory cancellation flag
    async fn is_cancel_requested(&self, task_id: TaskId) -> Result<bool, StoreError>;

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Get a task by id
    async fn get(&self, task_id: TaskId) -> Result<Task, StoreError>;

    /// List tasks matching `filter`, oldest submission first
    async fn list(&self, filter: TaskFilter, pagination: Pagination)
        -> Result<Vec<Task>, StoreError>;

    /// Aggregate counts per status
    async fn snapshot_counts(&self) -> Result<TaskCounts, StoreError>;

    // =========================================================================
    // Staleness Reclamation (optional, default no-op)
    // =========================================================================

    /// Reclaim tasks left `InProgress` for longer than `threshold`
    ///
    /// Reclaimed tasks go back to `Pending` with owner and start time cleared,
    /// except those with an accepted cancellation request, which become
    /// `Canceled`. A late `complete` from the previous holder is then
    /// rejected. Returns the ids of all reclaimed tasks. A threshold reaching
    /// before the representable time range reclaims nothing.
    async fn requeue_stale(&self, _threshold: Duration) -> Result<Vec<TaskId>, StoreError> {
        Ok(vec![])
    }
}

/// Start time before which an in-progress task counts as stale
///
/// `None` when `threshold` reaches past the representable time range.
pub(crate) fn stale_cutoff(now: DateTime<Utc>, threshold: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(threshold)
        .ok()
        .and_then(|threshold| now.checked_sub_signed(threshold))
}
