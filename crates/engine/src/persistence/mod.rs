//! Persistence layer for compute tasks
//!
//! This module provides:
//! - [`TaskStore`] trait for task persistence and claiming
//! - [`InMemoryTaskStore`] for tests and single-process use
//! - [`PostgresTaskStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;
pub use store::{CancelOutcome, Pagination, StoreError, TaskCounts, TaskFilter, TaskStore};
