//! Engine state reporting

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::persistence::{TaskCounts, TaskStore};
use crate::task::TaskId;
use crate::worker::slot::{SharedSlots, WorkerSlot};
use crate::worker::WorkerPoolStatus;

/// Name under which the engine state is published
pub const ENGINE_STATE_NAME: &str = "Compute Engine State";

const ENGINE_STATE_DESCRIPTION: &str =
    "Worker pool status, per-worker activity and task counts of the compute engine";

/// Whether a worker is executing a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerActivity {
    Idle,
    Busy,
}

impl std::fmt::Display for WorkerActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Busy => f.write_str("busy"),
        }
    }
}

/// Point-in-time view of one worker loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerState {
    pub worker_id: String,
    pub activity: WorkerActivity,
    pub current_task: Option<TaskId>,
    #[serde(rename = "since_last_activity_ms", with = "crate::config::duration_millis")]
    pub since_last_activity: Duration,
    /// Tasks this worker finished since the pool was created
    pub processed: u64,
    /// Store calls failed in a row; non-zero means degraded
    pub consecutive_store_failures: u32,
}

/// Overall engine health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineHealth {
    Healthy,
    /// The store is failing for the reporter or for at least one worker
    Degraded,
}

impl std::fmt::Display for EngineHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded => f.write_str("degraded"),
        }
    }
}

/// Snapshot of the whole engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub name: String,
    pub description: String,
    pub status: WorkerPoolStatus,
    pub health: EngineHealth,
    /// `None` when the store could not be queried
    pub counts: Option<TaskCounts>,
    pub workers: Vec<WorkerState>,
}

impl EngineState {
    /// Flatten into string attributes for a management console
    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert("name".to_string(), self.name.clone());
        attributes.insert("description".to_string(), self.description.clone());
        attributes.insert("status".to_string(), self.status.to_string());
        attributes.insert("health".to_string(), self.health.to_string());
        attributes.insert("worker_count".to_string(), self.workers.len().to_string());

        match &self.counts {
            Some(counts) => {
                attributes.insert("tasks.pending".to_string(), counts.pending.to_string());
                attributes.insert(
                    "tasks.in_progress".to_string(),
                    counts.in_progress.to_string(),
                );
                attributes.insert("tasks.succeeded".to_string(), counts.succeeded.to_string());
                attributes.insert("tasks.failed".to_string(), counts.failed.to_string());
                attributes.insert("tasks.canceled".to_string(), counts.canceled.to_string());
            }
            None => {
                attributes.insert("tasks".to_string(), "unavailable".to_string());
            }
        }

        for worker in &self.workers {
            let prefix = format!("workers.{}", worker.worker_id);
            attributes.insert(format!("{prefix}.activity"), worker.activity.to_string());
            attributes.insert(
                format!("{prefix}.current_task"),
                worker
                    .current_task
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            );
            attributes.insert(
                format!("{prefix}.since_last_activity_ms"),
                worker.since_last_activity.as_millis().to_string(),
            );
            attributes.insert(format!("{prefix}.processed"), worker.processed.to_string());
            attributes.insert(
                format!("{prefix}.consecutive_store_failures"),
                worker.consecutive_store_failures.to_string(),
            );
        }

        attributes
    }
}

/// Read-only view over a worker pool and its store
///
/// Cheap to clone and safe to call from any task while the pool runs.
/// Obtained from [`WorkerPool::reporter`](crate::WorkerPool::reporter).
#[derive(Clone)]
pub struct StateReporter {
    status: Arc<RwLock<WorkerPoolStatus>>,
    slots: SharedSlots,
    store: Arc<dyn TaskStore>,
}

impl StateReporter {
    pub(crate) fn new(
        status: Arc<RwLock<WorkerPoolStatus>>,
        slots: SharedSlots,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            status,
            slots,
            store,
        }
    }

    /// Current pool status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// State of every worker loop, in index order
    pub fn workers(&self) -> Vec<WorkerState> {
        self.slots().iter().map(|slot| slot.snapshot()).collect()
    }

    fn slots(&self) -> Arc<[Arc<WorkerSlot>]> {
        self.slots.read().clone()
    }

    /// Full engine snapshot, including task counts from the store
    pub async fn snapshot(&self) -> EngineState {
        let counts = match self.store.snapshot_counts().await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!("Failed to read task counts: {}", e);
                None
            }
        };

        let workers = self.workers();
        let degraded =
            counts.is_none() || workers.iter().any(|w| w.consecutive_store_failures > 0);

        EngineState {
            name: ENGINE_STATE_NAME.to_string(),
            description: ENGINE_STATE_DESCRIPTION.to_string(),
            status: self.status(),
            health: if degraded {
                EngineHealth::Degraded
            } else {
                EngineHealth::Healthy
            },
            counts,
            workers,
        }
    }
}

impl std::fmt::Debug for StateReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateReporter")
            .field("status", &self.status())
            .field("workers", &self.slots().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryTaskStore;
    use crate::task::PayloadRef;

    fn reporter(store: Arc<dyn TaskStore>, workers: usize) -> StateReporter {
        let slots: Arc<[Arc<WorkerSlot>]> = (0..workers)
            .map(|i| Arc::new(WorkerSlot::new(format!("node-worker-{i}"))))
            .collect();
        StateReporter::new(
            Arc::new(RwLock::new(WorkerPoolStatus::Running)),
            Arc::new(RwLock::new(slots)),
            store,
        )
    }

    #[tokio::test]
    async fn test_snapshot_healthy() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.enqueue(PayloadRef::new("a")).await.unwrap();
        let reporter = reporter(store, 2);

        let state = reporter.snapshot().await;
        assert_eq!(state.name, "Compute Engine State");
        assert_eq!(state.status, WorkerPoolStatus::Running);
        assert_eq!(state.health, EngineHealth::Healthy);
        assert_eq!(state.counts.unwrap().pending, 1);
        assert_eq!(state.workers.len(), 2);
        assert!(state
            .workers
            .iter()
            .all(|w| w.activity == WorkerActivity::Idle));
    }

    #[tokio::test]
    async fn test_worker_store_failures_degrade_health() {
        let reporter = reporter(Arc::new(InMemoryTaskStore::new()), 2);
        reporter.slots()[1].store_failed();

        let state = reporter.snapshot().await;
        assert_eq!(state.health, EngineHealth::Degraded);
        assert!(state.counts.is_some());
    }

    #[tokio::test]
    async fn test_attributes() {
        let reporter = reporter(Arc::new(InMemoryTaskStore::new()), 1);
        let task_id = TaskId::new();
        reporter.slots()[0].task_started(task_id);

        let attributes = reporter.snapshot().await.to_attributes();
        assert_eq!(attributes["name"], "Compute Engine State");
        assert_eq!(attributes["status"], "running");
        assert_eq!(attributes["health"], "healthy");
        assert_eq!(attributes["worker_count"], "1");
        assert_eq!(attributes["tasks.pending"], "0");
        assert_eq!(attributes["workers.node-worker-0.activity"], "busy");
        assert_eq!(
            attributes["workers.node-worker-0.current_task"],
            task_id.to_string()
        );
    }

    #[tokio::test]
    async fn test_state_serializes_to_json() {
        let reporter = reporter(Arc::new(InMemoryTaskStore::new()), 1);
        let json = serde_json::to_value(reporter.snapshot().await).unwrap();

        assert_eq!(json["status"], "running");
        assert_eq!(json["health"], "healthy");
        assert_eq!(json["workers"][0]["activity"], "idle");
        assert!(json["workers"][0]["since_last_activity_ms"].is_u64());
    }
}
