//! Worker pool for task execution
//!
//! Runs a fixed number of independent polling loops with graceful shutdown.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::listener::TaskListener;
use super::poller::TaskPoller;
use super::slot::{SharedSlots, WorkerSlot};
use crate::config::{ConfigError, EngineConfig, EngineConfiguration};
use crate::executor::{ExecutionContext, Outcome, TaskExecutor};
use crate::monitoring::StateReporter;
use crate::persistence::TaskStore;
use crate::task::{Task, TaskId};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPoolStatus {
    /// Loops are running and claiming tasks
    Running,
    /// Shutdown requested; in-flight tasks are finishing
    Draining,
    /// No loop is running
    Stopped,
}

impl std::fmt::Display for WorkerPoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Invalid configuration; the pool was not created
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Worker already running
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Shutdown timeout
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

#[derive(Debug, Clone, Copy)]
struct StaleReclaim {
    interval: Duration,
    threshold: Duration,
}

/// Worker pool executing tasks from a [`TaskStore`]
///
/// # Example
///
/// ```ignore
/// use compute_engine::prelude::*;
///
/// let config = EngineConfig::new(4, Duration::from_millis(500))?;
/// let store: Arc<dyn TaskStore> = Arc::new(PostgresTaskStore::new(pg_pool));
///
/// let pool = WorkerPool::new(&config, store.clone(), Arc::new(ReportProcessor))?
///     .with_shutdown_timeout(Duration::from_secs(10));
///
/// pool.start().await?;
/// store.enqueue(PayloadRef::new("reports/42")).await?;
///
/// // ... later, graceful shutdown
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    config: EngineConfig,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    node_id: String,
    slots: SharedSlots,
    listeners: Vec<Arc<dyn TaskListener>>,
    shutdown_timeout: Duration,
    stale_reclaim: Option<StaleReclaim>,
    shutdown_tx: watch::Sender<bool>,
    status: Arc<RwLock<WorkerPoolStatus>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool
    ///
    /// The configuration is validated and copied; later changes to it do
    /// not affect this pool.
    pub fn new(
        config: &dyn EngineConfiguration,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, WorkerPoolError> {
        let config = EngineConfig::new(config.worker_count(), config.queue_polling_delay())?;
        let node_id = format!("node-{}", Uuid::now_v7());
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            slots: Arc::new(RwLock::new(build_slots(&node_id, config.worker_count()))),
            config,
            store,
            executor,
            node_id,
            listeners: vec![],
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            stale_reclaim: None,
            shutdown_tx,
            status: Arc::new(RwLock::new(WorkerPoolStatus::Stopped)),
            handles: Mutex::new(vec![]),
        })
    }

    /// Set the node identifier used as worker id prefix
    ///
    /// Reporters already taken from this pool follow the new worker ids.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        *self.slots.write() = build_slots(&self.node_id, self.config.worker_count());
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Requeue tasks left in progress longer than `threshold`, checking every `interval`
    pub fn with_stale_reclaim(mut self, interval: Duration, threshold: Duration) -> Self {
        self.stale_reclaim = Some(StaleReclaim {
            interval,
            threshold,
        });
        self
    }

    /// Register a listener notified after each terminal transition
    pub fn with_listener(mut self, listener: Arc<dyn TaskListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Start all worker loops
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        let mut status = self.status.write();
        if *status != WorkerPoolStatus::Stopped {
            return Err(WorkerPoolError::AlreadyRunning);
        }

        info!(
            node_id = %self.node_id,
            worker_count = self.config.worker_count(),
            queue_polling_delay_ms = self.config.queue_polling_delay().as_millis() as u64,
            "Starting worker pool"
        );

        self.shutdown_tx.send_replace(false);
        let listeners: Arc<[Arc<dyn TaskListener>]> = self.listeners.clone().into();

        let mut handles = self.handles.lock();
        for slot in self.slots().iter() {
            let worker = Worker {
                poller: TaskPoller::new(
                    Arc::clone(&self.store),
                    Arc::clone(slot.worker_id()),
                    self.config.queue_polling_delay(),
                    self.shutdown_tx.subscribe(),
                ),
                slot: Arc::clone(slot),
                store: Arc::clone(&self.store),
                executor: Arc::clone(&self.executor),
                listeners: Arc::clone(&listeners),
            };
            let span = info_span!("worker", worker_id = %slot.worker_id());
            handles.push(tokio::spawn(worker.run().instrument(span)));
        }

        if let Some(reclaim) = self.stale_reclaim {
            handles.push(self.spawn_reclaim_loop(reclaim));
        }

        *status = WorkerPoolStatus::Running;
        Ok(())
    }

    /// Shutdown the worker pool gracefully
    ///
    /// Stops claiming, waits for in-flight tasks up to the shutdown timeout,
    /// then aborts whatever is still running.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
            *status = WorkerPoolStatus::Draining;
        }

        info!(node_id = %self.node_id, "Initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.handles.lock());
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let result =
            match tokio::time::timeout(self.shutdown_timeout, futures::future::join_all(handles))
                .await
            {
                Ok(results) => {
                    for result in results {
                        if let Err(e) = result {
                            error!("Worker loop terminated abnormally: {}", e);
                        }
                    }
                    debug!("All worker loops exited");
                    Ok(())
                }
                Err(_) => {
                    let slots = self.slots();
                    let busy = slots
                        .iter()
                        .filter(|slot| slot.snapshot().current_task.is_some())
                        .count();
                    warn!(remaining_tasks = busy, "Shutdown timeout reached, aborting workers");
                    for handle in abort_handles {
                        handle.abort();
                    }
                    for slot in slots.iter() {
                        slot.release();
                    }
                    Err(WorkerPoolError::ShutdownTimeout)
                }
            };

        *self.status.write() = WorkerPoolStatus::Stopped;
        info!(node_id = %self.node_id, "Worker pool stopped");
        result
    }

    /// Get current status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// Get the node identifier
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Identifiers of all worker loops, in index order
    pub fn worker_ids(&self) -> Vec<String> {
        self.slots()
            .iter()
            .map(|slot| slot.worker_id().to_string())
            .collect()
    }

    /// Configuration snapshot taken at construction
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-only reporter over this pool and its store
    pub fn reporter(&self) -> StateReporter {
        StateReporter::new(
            Arc::clone(&self.status),
            Arc::clone(&self.slots),
            Arc::clone(&self.store),
        )
    }

    fn slots(&self) -> Arc<[Arc<WorkerSlot>]> {
        self.slots.read().clone()
    }

    fn spawn_reclaim_loop(&self, reclaim: StaleReclaim) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reclaim.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.requeue_stale(reclaim.threshold).await {
                            Ok(reclaimed) => {
                                if !reclaimed.is_empty() {
                                    info!(count = reclaimed.len(), "Reclaimed stale tasks");
                                }
                            }
                            Err(e) => {
                                error!("Stale task reclamation failed: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Reclaim loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Reclaim loop exited");
        })
    }
}

fn build_slots(node_id: &str, worker_count: usize) -> Arc<[Arc<WorkerSlot>]> {
    (0..worker_count)
        .map(|index| Arc::new(WorkerSlot::new(format!("{node_id}-worker-{index}"))))
        .collect()
}

/// One polling loop
struct Worker {
    poller: TaskPoller,
    slot: Arc<WorkerSlot>,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    listeners: Arc<[Arc<dyn TaskListener>]>,
}

impl Worker {
    async fn run(self) {
        debug!("Worker loop started");
        let mut claimed_last = false;

        loop {
            // Sleep only when the previous poll found nothing
            if !claimed_last && self.poller.wait().await {
                break;
            }
            if self.poller.is_shutdown() {
                break;
            }

            // A store fault while recording an outcome backs off like a failed claim
            claimed_last = match self.poller.poll().await {
                Ok(Some(task)) => {
                    self.slot.store_succeeded();
                    self.process(task).await
                }
                Ok(None) => {
                    self.slot.store_succeeded();
                    false
                }
                Err(e) => {
                    let failures = self.slot.store_failed();
                    error!(consecutive_failures = failures, "Failed to claim task: {}", e);
                    false
                }
            };
        }

        debug!("Worker loop exited");
    }

    /// Execute a claimed task and record its outcome
    ///
    /// Returns `false` if the store failed while recording.
    async fn process(&self, task: Task) -> bool {
        let task_id = task.id;
        self.slot.task_started(task_id);

        let ctx = ExecutionContext::new(task_id, self.slot.worker_id(), Arc::clone(&self.store));
        let outcome = AssertUnwindSafe(self.executor.execute(&task, &ctx))
            .catch_unwind()
            .instrument(info_span!("task", %task_id))
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                warn!(%task_id, panic = %message, "Executor panicked");
                Outcome::failure(format!("executor panicked: {message}"))
            });

        let store_healthy = self.record(task_id, outcome).await;
        self.slot.task_finished();
        store_healthy
    }

    /// Persist an outcome, retrying store faults once per polling delay
    ///
    /// Stops on success, on a conflict, or when shutdown is signalled. An
    /// outcome abandoned at shutdown leaves the task in progress until it
    /// is reclaimed. Returns `false` if any attempt hit a store fault.
    async fn record(&self, task_id: TaskId, outcome: Outcome) -> bool {
        let worker_id = self.slot.worker_id().as_ref();
        let mut store_healthy = true;

        loop {
            match self.store.complete(task_id, worker_id, outcome.clone()).await {
                Ok(finished) => {
                    self.slot.store_succeeded();
                    debug!(%task_id, status = %finished.status, "Task finished");
                    self.notify(finished);
                    return store_healthy;
                }
                Err(e) if e.is_conflict() => {
                    warn!(%task_id, "Task completion rejected: {}", e);
                    return store_healthy;
                }
                Err(e) if e.is_storage() => {
                    store_healthy = false;
                    let failures = self.slot.store_failed();
                    error!(
                        %task_id,
                        consecutive_failures = failures,
                        "Failed to complete task: {}",
                        e
                    );
                    if self.poller.wait().await {
                        warn!(%task_id, "Shutdown requested, task outcome not recorded");
                        return false;
                    }
                }
                Err(e) => {
                    error!(%task_id, "Failed to complete task: {}", e);
                    return store_healthy;
                }
            }
        }
    }

    fn notify(&self, task: Task) {
        for listener in self.listeners.iter() {
            let listener = Arc::clone(listener);
            let task = task.clone();
            tokio::spawn(async move {
                let notified = AssertUnwindSafe(listener.on_task_finished(&task))
                    .catch_unwind()
                    .await;
                if notified.is_err() {
                    warn!(task_id = %task.id, "Task listener panicked");
                }
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
