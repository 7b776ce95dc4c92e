//! Task record and identifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TaskStatus;

/// Opaque task identity
///
/// Backed by a UUID v7, so identities sort by creation time. Stores use the
/// identity as the claim tie-break after the submission timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new time-ordered identity
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Opaque reference to the work payload
///
/// The engine never interprets it; executors resolve it to whatever the
/// payload actually is (a report file, a row id, an object key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadRef(String);

impl PayloadRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PayloadRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PayloadRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A unit of submitted work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub payload: PayloadRef,
    pub submitted_at: DateTime<Utc>,
    /// Set when a worker claims the task
    pub started_at: Option<DateTime<Utc>>,
    /// Set on the terminal transition
    pub completed_at: Option<DateTime<Utc>>,
    /// Worker currently (or last) holding the task
    pub worker_id: Option<String>,
    /// Failure detail for `Failed` tasks, reason for `Canceled` ones
    pub error: Option<String>,
    /// Advisory cancellation flag, observed cooperatively by the executor
    pub cancel_requested: bool,
}

impl Task {
    /// Create a new pending task
    pub fn pending(payload: PayloadRef, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            status: TaskStatus::Pending,
            payload,
            submitted_at,
            started_at: None,
            completed_at: None,
            worker_id: None,
            error: None,
            cancel_requested: false,
        }
    }

    /// Whether `worker_id` currently holds this task
    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.status == TaskStatus::InProgress && self.worker_id.as_deref() == Some(worker_id)
    }

    /// Latest timestamp recorded on the task
    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.completed_at
            .or(self.started_at)
            .unwrap_or(self.submitted_at)
    }

    /// Claim ordering key: oldest submission first, then lowest identity
    pub(crate) fn claim_key(&self) -> (DateTime<Utc>, TaskId) {
        (self.submitted_at, self.id)
    }
}

/// Clamp `now` so recorded timestamps never go backwards
pub(crate) fn not_before(now: DateTime<Utc>, floor: DateTime<Utc>) -> DateTime<Utc> {
    now.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_task_ids_are_time_ordered() {
        let first = TaskId::new();
        let second = TaskId::new();
        assert!(first < second);
    }

    #[test]
    fn test_pending_task() {
        let now = Utc::now();
        let task = Task::pending(PayloadRef::new("report-42"), now);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.payload.as_str(), "report-42");
        assert_eq!(task.submitted_at, now);
        assert!(task.started_at.is_none());
        assert!(task.worker_id.is_none());
        assert!(!task.cancel_requested);
        assert_eq!(task.last_timestamp(), now);
    }

    #[test]
    fn test_is_held_by() {
        let mut task = Task::pending(PayloadRef::new("p"), Utc::now());
        assert!(!task.is_held_by("w-1"));

        task.status = TaskStatus::InProgress;
        task.worker_id = Some("w-1".to_string());
        assert!(task.is_held_by("w-1"));
        assert!(!task.is_held_by("w-2"));

        task.status = TaskStatus::Success;
        assert!(!task.is_held_by("w-1"));
    }

    #[test]
    fn test_not_before_clamps_backwards_clock() {
        let floor = Utc::now();
        let earlier = floor - Duration::seconds(5);
        assert_eq!(not_before(earlier, floor), floor);

        let later = floor + Duration::seconds(5);
        assert_eq!(not_before(later, floor), later);
    }

    #[test]
    fn test_task_id_serializes_as_plain_uuid() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }
}
