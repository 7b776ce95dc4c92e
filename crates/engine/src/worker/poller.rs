//! Fixed-delay task polling
//!
//! Each worker loop owns one poller: it claims at most one task per poll and
//! sleeps the configured delay between polls. Sleeping is interrupted as soon
//! as shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::persistence::{StoreError, TaskStore};
use crate::task::Task;

/// Task poller for a single worker loop
pub struct TaskPoller {
    store: Arc<dyn TaskStore>,
    worker_id: Arc<str>,
    delay: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskPoller {
    /// Create a new task poller
    pub fn new(
        store: Arc<dyn TaskStore>,
        worker_id: Arc<str>,
        delay: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            worker_id,
            delay,
            shutdown_rx,
        }
    }

    /// Try to claim the next pending task
    ///
    /// Returns `Ok(None)` when nothing is pending or shutdown was requested.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn poll(&self) -> Result<Option<Task>, StoreError> {
        if self.is_shutdown() {
            debug!("Poller shutdown requested");
            return Ok(None);
        }

        let task = self.store.claim_next(&self.worker_id).await?;

        match &task {
            Some(task) => debug!(task_id = %task.id, "Claimed task"),
            None => trace!("No pending task"),
        }

        Ok(task)
    }

    /// Wait for the polling delay
    ///
    /// Returns `true` if shutdown is signalled before or during the wait.
    pub async fn wait(&self) -> bool {
        if self.is_shutdown() {
            return true;
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => false,
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                debug!("Shutdown signal received during wait");
                true
            }
        }
    }

    /// Get the polling delay
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
