//! # Compute Task Engine
//!
//! A store-backed background task engine: submitted tasks are persisted,
//! claimed by exactly one worker, executed, and their outcome recorded.
//!
//! ## Features
//!
//! - **Atomic claiming**: the oldest pending task goes to exactly one worker
//! - **Fixed worker pool**: independent polling loops with graceful shutdown
//! - **Advisory cancellation**: executors stop early at cooperative checkpoints
//! - **State reporting**: read-only snapshots for management consoles
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  (N polling loops, shutdown signal, optional stale reclaim)  │
//! └─────────────────────────────────────────────────────────────┘
//!            │ claim_next / complete              ▲ execute
//!            ▼                                    │
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │          TaskStore            │   │      TaskExecutor         │
//! │ (PostgreSQL: compute_tasks)   │   │  (supplied by the host)   │
//! └──────────────────────────────┘   └──────────────────────────┘
//!            ▲
//!            │ snapshot_counts
//! ┌──────────────────────────────┐
//! │        StateReporter          │
//! └──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use compute_engine::prelude::*;
//!
//! struct ReportProcessor;
//!
//! #[async_trait]
//! impl TaskExecutor for ReportProcessor {
//!     async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Outcome {
//!         if let Err(canceled) = ctx.checkpoint().await {
//!             return canceled.into();
//!         }
//!         Outcome::from_result(process(&task.payload).await)
//!     }
//! }
//!
//! let config = EngineConfig::from_env()?;
//! let store: Arc<dyn TaskStore> = Arc::new(PostgresTaskStore::new(pg_pool));
//! let pool = WorkerPool::new(&config, store.clone(), Arc::new(ReportProcessor))?;
//!
//! pool.start().await?;
//! store.enqueue(PayloadRef::new("reports/42")).await?;
//! ```

pub mod config;
pub mod executor;
pub mod monitoring;
pub mod persistence;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::config::{ConfigError, EngineConfig, EngineConfiguration, MutableEngineConfig};
    pub use crate::executor::{Canceled, ExecutionContext, FnExecutor, Outcome, TaskExecutor};
    pub use crate::monitoring::{
        EngineHealth, EngineState, StateReporter, WorkerActivity, WorkerState,
    };
    pub use crate::persistence::{
        CancelOutcome, InMemoryTaskStore, Pagination, PostgresTaskStore, StoreError, TaskCounts,
        TaskFilter, TaskStore,
    };
    pub use crate::task::{PayloadRef, Task, TaskId, TaskStatus};
    pub use crate::worker::{TaskListener, WorkerPool, WorkerPoolError, WorkerPoolStatus};
}

// Re-export key types at crate root
pub use config::{ConfigError, EngineConfig, EngineConfiguration, MutableEngineConfig};
pub use executor::{Canceled, ExecutionContext, FnExecutor, Outcome, TaskExecutor};
pub use monitoring::{EngineHealth, EngineState, StateReporter, WorkerActivity, WorkerState};
pub use persistence::{
    CancelOutcome, InMemoryTaskStore, Pagination, PostgresTaskStore, StoreError, TaskCounts,
    TaskFilter, TaskStore,
};
pub use task::{PayloadRef, Task, TaskId, TaskStatus};
pub use worker::{TaskListener, WorkerPool, WorkerPoolError, WorkerPoolStatus};
