//! In-memory implementation of TaskStore for testing

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::store::*;
use crate::executor::Outcome;
use crate::task::{not_before, PayloadRef, Task, TaskId, TaskStatus};

/// Internal store state, guarded by a single lock
#[derive(Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    /// Pending tasks in claim order
    pending: BTreeSet<(DateTime<Utc>, TaskId)>,
    /// Latest submission timestamp handed out
    last_submitted: Option<DateTime<Utc>>,
}

/// In-memory implementation of TaskStore
///
/// This is primarily for testing. It stores all data in memory and
/// provides the same semantics as the PostgreSQL implementation: every
/// transition runs under one write lock, so a claim is a single
/// check-and-set on the task status.
///
/// # Example
///
/// ```
/// use compute_engine::InMemoryTaskStore;
///
/// let store = InMemoryTaskStore::new();
/// assert_eq!(store.len(), 0);
/// ```
pub struct InMemoryTaskStore {
    state: RwLock<StoreState>,
}

impl InMemoryTaskStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Get the number of tasks in any status
    pub fn len(&self) -> usize {
        self.state.read().tasks.len()
    }

    /// Whether the store holds no tasks
    pub fn is_empty(&self) -> bool {
        self.state.read().tasks.is_empty()
    }

    /// Get the number of pending tasks
    pub fn pending_task_count(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.tasks.clear();
        state.pending.clear();
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn enqueue(&self, payload: PayloadRef) -> Result<TaskId, StoreError> {
        let mut state = self.state.write();

        // Submission timestamps never go backwards, so claim order is enqueue order
        let submitted_at = match state.last_submitted {
            Some(last) => not_before(Utc::now(), last),
            None => Utc::now(),
        };
        state.last_submitted = Some(submitted_at);

        let task = Task::pending(payload, submitted_at);
        let task_id = task.id;
        state.pending.insert(task.claim_key());
        state.tasks.insert(task_id, task);

        debug!(%task_id, "enqueued task");
        Ok(task_id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>, StoreError> {
        let mut state = self.state.write();

        let Some((_, task_id)) = state.pending.pop_first() else {
            return Ok(None);
        };

        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;

        debug_assert_eq!(task.status, TaskStatus::Pending);
        task.status = TaskStatus::InProgress;
        task.started_at = Some(not_before(Utc::now(), task.submitted_at));
        task.worker_id = Some(worker_id.to_string());

        debug!(%task_id, worker_id, "claimed task");
        Ok(Some(task.clone()))
    }

    async fn complete(
        &self,
        task_id: TaskId,
        worker_id: &str,
        outcome: Outcome,
    ) -> Result<Task, StoreError> {
        let mut state = self.state.write();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;

        if task.status != TaskStatus::InProgress {
            return Err(StoreError::Conflict {
                task_id,
                operation: "complete",
                actual: task.status,
            });
        }
        if task.worker_id.as_deref() != Some(worker_id) {
            return Err(StoreError::NotOwner {
                task_id,
                worker_id: worker_id.to_string(),
                owner: task.worker_id.clone(),
            });
        }

        task.status = outcome.status();
        task.completed_at = Some(not_before(Utc::now(), task.last_timestamp()));
        task.error = outcome.detail().map(str::to_string);

        debug!(%task_id, worker_id, status = %task.status, "completed task");
        Ok(task.clone())
    }

    async fn cancel(&self, task_id: TaskId) -> Result<CancelOutcome, StoreError> {
        let mut state = self.state.write();
        let StoreState { tasks, pending, .. } = &mut *state;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;

        match task.status {
            TaskStatus::Pending => {
                pending.remove(&task.claim_key());
                task.status = TaskStatus::Canceled;
                task.cancel_requested = true;
                task.completed_at = Some(not_before(Utc::now(), task.submitted_at));
                debug!(%task_id, "canceled pending task");
                Ok(CancelOutcome::Canceled)
            }
            TaskStatus::InProgress => {
                task.cancel_requested = true;
                debug!(%task_id, "cancellation requested for running task");
                Ok(CancelOutcome::Requested)
            }
            TaskStatus::Canceled => Ok(CancelOutcome::AlreadyCanceled),
            actual @ (TaskStatus::Success | TaskStatus::Failed) => Err(StoreError::Conflict {
                task_id,
                operation: "cancel",
                actual,
            }),
        }
    }

    async fn is_cancel_requested(&self, task_id: TaskId) -> Result<bool, StoreError> {
        self.state
            .read()
            .tasks
            .get(&task_id)
            .map(|t| t.cancel_requested)
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn get(&self, task_id: TaskId) -> Result<Task, StoreError> {
        self.state
            .read()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn list(
        &self,
        filter: TaskFilter,
        pagination: Pagination,
    ) -> Result<Vec<Task>, StoreError> {
        let state = self.state.read();
        let mut tasks: Vec<_> = state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();

        tasks.sort_by_key(|t| t.claim_key());

        Ok(tasks
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect())
    }

    async fn snapshot_counts(&self) -> Result<TaskCounts, StoreError> {
        let state = self.state.read();
        let mut counts = TaskCounts::default();
        for task in state.tasks.values() {
            counts.record(task.status);
        }
        Ok(counts)
    }

    async fn requeue_stale(&self, threshold: Duration) -> Result<Vec<TaskId>, StoreError> {
        let now = Utc::now();
        let Some(cutoff) = stale_cutoff(now, threshold) else {
            return Ok(vec![]);
        };

        let mut state = self.state.write();
        let StoreState { tasks, pending, .. } = &mut *state;
        let mut reclaimed = vec![];

        for task in tasks.values_mut() {
            let stale = task.status == TaskStatus::InProgress
                && task.started_at.is_some_and(|started| started < cutoff);
            if !stale {
                continue;
            }

            if task.cancel_requested {
                task.status = TaskStatus::Canceled;
                task.completed_at = Some(not_before(now, task.last_timestamp()));
            } else {
                task.status = TaskStatus::Pending;
                task.started_at = None;
                task.worker_id = None;
                pending.insert(task.claim_key());
            }
            reclaimed.push(task.id);
        }

        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "reclaimed stale tasks");
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn enqueue(store: &InMemoryTaskStore, payload: &str) -> TaskId {
        store.enqueue(PayloadRef::new(payload)).await.unwrap()
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let store = InMemoryTaskStore::new();

        // Enqueue task
        let task_id = enqueue(&store, "report-1").await;
        assert_eq!(store.pending_task_count(), 1);

        let task = store.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());

        // Claim task
        let claimed = store.claim_next("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, task_id);
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
        assert!(claimed.started_at.unwrap() >= claimed.submitted_at);

        // Complete task
        let done = store
            .complete(task_id, "worker-1", Outcome::Success)
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Success);
        assert!(done.completed_at.unwrap() >= done.started_at.unwrap());
        assert!(done.error.is_none());

        // Task should no longer be pending
        assert_eq!(store.pending_task_count(), 0);
        assert!(store.claim_next("worker-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_empty_store() {
        let store = InMemoryTaskStore::new();
        assert!(store.claim_next("worker-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_order_follows_submission() {
        let store = InMemoryTaskStore::new();
        let a = enqueue(&store, "a").await;
        let b = enqueue(&store, "b").await;
        let c = enqueue(&store, "c").await;

        let first = store.claim_next("worker-1").await.unwrap().unwrap();
        let second = store.claim_next("worker-2").await.unwrap().unwrap();
        let third = store.claim_next("worker-1").await.unwrap().unwrap();

        assert_eq!([first.id, second.id, third.id], [a, b, c]);
    }

    #[tokio::test]
    async fn test_failure_records_detail() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;
        store.claim_next("worker-1").await.unwrap();

        let task = store
            .complete(task_id, "worker-1", Outcome::failure("parse error at line 3"))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("parse error at line 3"));
    }

    #[tokio::test]
    async fn test_complete_by_other_worker_is_conflict() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;
        store.claim_next("worker-1").await.unwrap();

        let before = store.get(task_id).await.unwrap();
        let result = store.complete(task_id, "worker-2", Outcome::Success).await;

        assert!(matches!(result, Err(StoreError::NotOwner { .. })));
        assert_eq!(store.get(task_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_complete_pending_task_is_conflict() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;

        let result = store.complete(task_id, "worker-1", Outcome::Success).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict {
                actual: TaskStatus::Pending,
                ..
            })
        ));
        assert_eq!(store.pending_task_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_conflict() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;
        store.claim_next("worker-1").await.unwrap();
        store
            .complete(task_id, "worker-1", Outcome::Success)
            .await
            .unwrap();

        let result = store
            .complete(task_id, "worker-1", Outcome::failure("late"))
            .await;
        assert!(result.unwrap_err().is_conflict());

        let task = store.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_pending_is_idempotent() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;

        assert_eq!(store.cancel(task_id).await.unwrap(), CancelOutcome::Canceled);
        assert_eq!(
            store.cancel(task_id).await.unwrap(),
            CancelOutcome::AlreadyCanceled
        );

        let task = store.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Canceled);
        assert!(task.completed_at.is_some());

        // Canceled tasks are never claimed
        assert!(store.claim_next("worker-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_running_task_is_advisory() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;
        store.claim_next("worker-1").await.unwrap();

        assert_eq!(store.cancel(task_id).await.unwrap(), CancelOutcome::Requested);
        assert!(store.is_cancel_requested(task_id).await.unwrap());
        assert_eq!(
            store.get(task_id).await.unwrap().status,
            TaskStatus::InProgress
        );

        // Executor honours the flag
        let task = store
            .complete(task_id, "worker-1", Outcome::Canceled)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Canceled);
    }

    #[tokio::test]
    async fn test_running_task_may_still_succeed_after_cancel_request() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;
        store.claim_next("worker-1").await.unwrap();
        store.cancel(task_id).await.unwrap();

        let task = store
            .complete(task_id, "worker-1", Outcome::Success)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_cancel_finished_task_is_conflict() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;
        store.claim_next("worker-1").await.unwrap();
        store
            .complete(task_id, "worker-1", Outcome::Success)
            .await
            .unwrap();

        let result = store.cancel(task_id).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict {
                operation: "cancel",
                actual: TaskStatus::Success,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let store = InMemoryTaskStore::new();
        let missing = TaskId::new();

        assert!(matches!(
            store.get(missing).await,
            Err(StoreError::TaskNotFound(id)) if id == missing
        ));
        assert!(matches!(
            store.cancel(missing).await,
            Err(StoreError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_counts() {
        let store = InMemoryTaskStore::new();
        let ok = enqueue(&store, "ok").await;
        let bad = enqueue(&store, "bad").await;
        let running = enqueue(&store, "running").await;
        let waiting = enqueue(&store, "waiting").await;
        let dropped = enqueue(&store, "dropped").await;
        store.cancel(dropped).await.unwrap();

        for _ in 0..3 {
            store.claim_next("worker-1").await.unwrap();
        }
        store.complete(ok, "worker-1", Outcome::Success).await.unwrap();
        store
            .complete(bad, "worker-1", Outcome::failure("boom"))
            .await
            .unwrap();

        let counts = store.snapshot_counts().await.unwrap();
        assert_eq!(
            counts,
            TaskCounts {
                pending: 1,
                in_progress: 1,
                succeeded: 1,
                failed: 1,
                canceled: 1,
            }
        );
        assert_eq!(store.get(running).await.unwrap().status, TaskStatus::InProgress);
        assert_eq!(store.get(waiting).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_list_with_filter_and_pagination() {
        let store = InMemoryTaskStore::new();
        let ids: Vec<_> = futures::future::join_all((0..5).map(|i| {
            let store = &store;
            async move { enqueue(store, &format!("r-{i}")).await }
        }))
        .await;
        store.claim_next("worker-1").await.unwrap();

        let pending = store
            .list(TaskFilter::with_status(TaskStatus::Pending), Pagination::default())
            .await
            .unwrap();
        assert_eq!(pending.len(), 4);
        assert!(pending.windows(2).all(|w| w[0].claim_key() < w[1].claim_key()));

        let mine = store
            .list(TaskFilter::with_worker("worker-1"), Pagination::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);

        let page = store
            .list(
                TaskFilter::default(),
                Pagination {
                    offset: 1,
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(ids.contains(&page[0].id));
    }

    #[tokio::test]
    async fn test_requeue_stale() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;
        store.claim_next("worker-1").await.unwrap();

        // Fresh claims are not stale
        let requeued = store.requeue_stale(Duration::from_secs(60)).await.unwrap();
        assert!(requeued.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let requeued = store
            .requeue_stale(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(requeued, vec![task_id]);

        let task = store.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.worker_id.is_none());
        assert!(task.started_at.is_none());

        // The previous holder can no longer complete it
        let late = store.complete(task_id, "worker-1", Outcome::Success).await;
        assert!(late.unwrap_err().is_conflict());

        // Another worker picks it up again
        let reclaimed = store.claim_next("worker-2").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, task_id);
    }

    #[tokio::test]
    async fn test_requeue_stale_honors_cancel_request() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;
        store.claim_next("worker-1").await.unwrap();
        assert_eq!(
            store.cancel(task_id).await.unwrap(),
            CancelOutcome::Requested
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let reclaimed = store
            .requeue_stale(Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(reclaimed, vec![task_id]);

        let task = store.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Canceled);
        assert!(task.completed_at.unwrap() >= task.started_at.unwrap());
        assert!(store.claim_next("worker-2").await.unwrap().is_none());
        assert_eq!(
            store.cancel(task_id).await.unwrap(),
            CancelOutcome::AlreadyCanceled
        );
    }

    #[tokio::test]
    async fn test_requeue_stale_with_huge_threshold_reclaims_nothing() {
        let store = InMemoryTaskStore::new();
        let task_id = enqueue(&store, "report").await;
        store.claim_next("worker-1").await.unwrap();

        for threshold in [Duration::MAX, Duration::from_secs(10_000_000_000_000)] {
            let reclaimed = store.requeue_stale(threshold).await.unwrap();
            assert!(reclaimed.is_empty());
        }
        assert_eq!(
            store.get(task_id).await.unwrap().status,
            TaskStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryTaskStore::new();
        enqueue(&store, "a").await;
        assert!(!store.is_empty());

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.pending_task_count(), 0);
    }
}
