//! TaskExecutor trait definition

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ExecutionContext;
use crate::task::{Task, TaskStatus};

/// Result of executing one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Work finished successfully
    Success,

    /// Work failed; the detail is recorded on the task
    Failure(String),

    /// Executor observed the cancellation flag and stopped early
    Canceled,
}

impl Outcome {
    /// Create a failure outcome
    pub fn failure(detail: impl Into<String>) -> Self {
        Self::Failure(detail.into())
    }

    /// Map `Ok` to success and `Err` to a failure carrying the error text
    pub fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => Self::Failure(e.to_string()),
        }
    }

    /// Terminal status this outcome maps to
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Success => TaskStatus::Success,
            Self::Failure(_) => TaskStatus::Failed,
            Self::Canceled => TaskStatus::Canceled,
        }
    }

    /// Failure detail, if any
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Failure(detail) => Some(detail),
            _ => None,
        }
    }
}

impl From<super::Canceled> for Outcome {
    fn from(_: super::Canceled) -> Self {
        Self::Canceled
    }
}

/// Executes claimed tasks
///
/// The engine never interprets payloads: it claims a task, hands it to the
/// executor, and persists whatever outcome comes back. A panic inside
/// `execute` is caught by the worker loop and recorded as a failure.
///
/// # Example
///
/// ```ignore
/// use compute_engine::prelude::*;
///
/// struct ReportProcessor;
///
/// #[async_trait]
/// impl TaskExecutor for ReportProcessor {
///     async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Outcome {
///         for step in steps(&task.payload) {
///             if let Err(canceled) = ctx.checkpoint().await {
///                 return canceled.into();
///             }
///             if let Err(e) = step.run().await {
///                 return Outcome::failure(e.to_string());
///             }
///         }
///         Outcome::Success
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Execute one task
    async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Outcome;
}

/// Adapts an async closure into a [`TaskExecutor`]
///
/// ```ignore
/// let executor = FnExecutor::new(|task, _ctx| async move {
///     println!("processing {}", task.payload);
///     Outcome::Success
/// });
/// ```
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(Task, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Outcome {
        (self.f)(task.clone(), ctx.clone()).await
    }
}
