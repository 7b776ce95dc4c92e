//! Task execution context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::persistence::TaskStore;
use crate::task::TaskId;

/// Returned by [`ExecutionContext::checkpoint`] once cancellation was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("task {0} was canceled")]
pub struct Canceled(pub TaskId);

/// Context provided to executors during execution
///
/// The context provides:
/// - The identity of the task and of the worker running it
/// - Cancellation detection at cooperative checkpoints
///
/// Cancellation is advisory: nothing interrupts the executor. It only stops
/// early if it calls [`checkpoint`](Self::checkpoint) and honours the result.
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Outcome {
///     for chunk in chunks {
///         if let Err(canceled) = ctx.checkpoint().await {
///             return canceled.into();
///         }
///         process(chunk).await;
///     }
///     Outcome::Success
/// }
/// ```
#[derive(Clone)]
pub struct ExecutionContext {
    task_id: TaskId,
    worker_id: Arc<str>,
    store: Arc<dyn TaskStore>,
    /// Sticky once the store reported a cancellation request
    cancelled: Arc<AtomicBool>,
}

impl ExecutionContext {
    /// Create a new execution context
    pub fn new(task_id: TaskId, worker_id: impl AsRef<str>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            task_id,
            worker_id: Arc::from(worker_id.as_ref()),
            store,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Check whether cancellation was requested for this task
    ///
    /// A store error reads as "not canceled": execution continues and the
    /// next checkpoint asks again.
    pub async fn is_cancel_requested(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }

        match self.store.is_cancel_requested(self.task_id).await {
            Ok(true) => {
                self.cancelled.store(true, Ordering::Relaxed);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "Cancellation check failed");
                false
            }
        }
    }

    /// Cooperative checkpoint: `Err(Canceled)` once cancellation was requested
    pub async fn checkpoint(&self) -> Result<(), Canceled> {
        if self.is_cancel_requested().await {
            Err(Canceled(self.task_id))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_id", &self.task_id)
            .field("worker_id", &self.worker_id)
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}
