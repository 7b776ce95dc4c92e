//! Task status and the allowed transitions between statuses

use serde::{Deserialize, Serialize};

/// Task status in the queue
///
/// Transitions are monotonic:
///
/// ```text
/// Pending ──► InProgress ──► Success
///    │            │  └─────► Failed
///    │            ▼
///    └──────► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Submitted and waiting to be claimed
    Pending,

    /// Claimed by exactly one worker and executing
    InProgress,

    /// Executor reported success
    Success,

    /// Executor reported failure (or panicked)
    Failed,

    /// Canceled before or during execution
    Canceled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Success,
        TaskStatus::Failed,
        TaskStatus::Canceled,
    ];

    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Canceled)
                | (InProgress, Success)
                | (InProgress, Failed)
                | (InProgress, Canceled)
        )
    }

    /// Database representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse the database representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
