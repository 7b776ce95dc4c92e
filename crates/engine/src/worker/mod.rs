//! Worker pool for task execution
//!
//! This module provides:
//! - [`WorkerPool`] - Fixed-size pool of independent polling loops
//! - [`TaskPoller`] - Fixed-delay, shutdown-aware task polling
//! - [`TaskListener`] - Hook notified after each terminal transition
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         WorkerPool                            │
//! │  ┌──────────────┐  ┌──────────────┐       ┌──────────────┐   │
//! │  │  worker-0    │  │  worker-1    │  ...  │ Stale        │   │
//! │  │ poll / exec  │  │ poll / exec  │       │ Reclaimer    │   │
//! │  └──────┬───────┘  └──────┬───────┘       └──────┬───────┘   │
//! │         │   WorkerSlot    │   WorkerSlot         │ (opt-in)  │
//! └─────────┼─────────────────┼──────────────────────┼───────────┘
//!           ▼                 ▼                      ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 TaskStore (atomic claim_next)                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Loops never coordinate with each other: the store guarantees a task is
//! claimed by exactly one of them.

mod listener;
mod poller;
mod pool;
pub(crate) mod slot;

pub use listener::TaskListener;
pub use poller::TaskPoller;
pub use pool::{WorkerPool, WorkerPoolError, WorkerPoolStatus};
