//! Task completion listeners

use async_trait::async_trait;

use crate::task::Task;

/// Notified after a worker records a terminal outcome
///
/// Listeners run on their own spawned task, so a slow or panicking listener
/// never holds up the worker loop. Notification is best effort: a listener
/// still running when the runtime shuts down is dropped.
///
/// # Example
///
/// ```ignore
/// struct AuditLog;
///
/// #[async_trait]
/// impl TaskListener for AuditLog {
///     async fn on_task_finished(&self, task: &Task) {
///         info!(task_id = %task.id, status = %task.status, "task finished");
///     }
/// }
///
/// let pool = WorkerPool::new(&config, store, executor)?
///     .with_listener(Arc::new(AuditLog));
/// ```
#[async_trait]
pub trait TaskListener: Send + Sync + 'static {
    async fn on_task_finished(&self, task: &Task);
}
