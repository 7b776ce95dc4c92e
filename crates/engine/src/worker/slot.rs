//! Per-worker reporting slot
//!
//! Each worker loop publishes its state into its own slot. The lock is held
//! only for field updates, so readers never wait on task execution.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::monitoring::{WorkerActivity, WorkerState};
use crate::task::TaskId;

/// Slot list shared by a pool and its reporters
///
/// Replaced as a whole when the pool is renamed, so reporters taken earlier
/// follow the new worker ids.
pub(crate) type SharedSlots = Arc<RwLock<Arc<[Arc<WorkerSlot>]>>>;

#[derive(Debug)]
struct SlotState {
    current_task: Option<TaskId>,
    last_activity: Instant,
    processed: u64,
    consecutive_store_failures: u32,
}

/// Reporting slot owned by one worker loop
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    worker_id: Arc<str>,
    state: Mutex<SlotState>,
}

impl WorkerSlot {
    pub(crate) fn new(worker_id: impl Into<Arc<str>>) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: Mutex::new(SlotState {
                current_task: None,
                last_activity: Instant::now(),
                processed: 0,
                consecutive_store_failures: 0,
            }),
        }
    }

    pub(crate) fn worker_id(&self) -> &Arc<str> {
        &self.worker_id
    }

    pub(crate) fn task_started(&self, task_id: TaskId) {
        let mut state = self.state.lock();
        state.current_task = Some(task_id);
        state.last_activity = Instant::now();
    }

    pub(crate) fn task_finished(&self) {
        let mut state = self.state.lock();
        state.current_task = None;
        state.processed += 1;
        state.last_activity = Instant::now();
    }

    /// Forget the current task without counting it (aborted worker)
    pub(crate) fn release(&self) {
        self.state.lock().current_task = None;
    }

    pub(crate) fn store_succeeded(&self) {
        self.state.lock().consecutive_store_failures = 0;
    }

    /// Record a store failure, returning the consecutive failure count
    pub(crate) fn store_failed(&self) -> u32 {
        let mut state = self.state.lock();
        state.consecutive_store_failures = state.consecutive_store_failures.saturating_add(1);
        state.consecutive_store_failures
    }

    pub(crate) fn snapshot(&self) -> WorkerState {
        let state = self.state.lock();
        WorkerState {
            worker_id: self.worker_id.to_string(),
            activity: if state.current_task.is_some() {
                WorkerActivity::Busy
            } else {
                WorkerActivity::Idle
            },
            current_task: state.current_task,
            since_last_activity: state.last_activity.elapsed(),
            processed: state.processed,
            consecutive_store_failures: state.consecutive_store_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_tracks_current_task() {
        let slot = WorkerSlot::new("node-worker-0");
        let task_id = TaskId::new();

        let idle = slot.snapshot();
        assert_eq!(idle.activity, WorkerActivity::Idle);
        assert_eq!(idle.processed, 0);

        slot.task_started(task_id);
        let busy = slot.snapshot();
        assert_eq!(busy.activity, WorkerActivity::Busy);
        assert_eq!(busy.current_task, Some(task_id));

        slot.task_finished();
        let done = slot.snapshot();
        assert_eq!(done.activity, WorkerActivity::Idle);
        assert!(done.current_task.is_none());
        assert_eq!(done.processed, 1);
    }

    #[test]
    fn test_store_failures_reset_on_success() {
        let slot = WorkerSlot::new("node-worker-0");
        assert_eq!(slot.store_failed(), 1);
        assert_eq!(slot.store_failed(), 2);
        assert_eq!(slot.snapshot().consecutive_store_failures, 2);

        slot.store_succeeded();
        assert_eq!(slot.snapshot().consecutive_store_failures, 0);
    }

    #[test]
    fn test_release_does_not_count_as_processed() {
        let slot = WorkerSlot::new("node-worker-0");
        slot.task_started(TaskId::new());
        slot.release();

        let state = slot.snapshot();
        assert!(state.current_task.is_none());
        assert_eq!(state.processed, 0);
    }
}
