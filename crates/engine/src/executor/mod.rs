//! Task executor contract
//!
//! Executors are supplied by the host application. They:
//! - Receive a claimed task and an [`ExecutionContext`]
//! - Return an [`Outcome`] that the worker persists
//! - May stop early at a cancellation checkpoint

mod context;
mod definition;

pub use context::{Canceled, ExecutionContext};
pub use definition::{FnExecutor, Outcome, TaskExecutor};
