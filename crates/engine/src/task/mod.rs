//! Task model
//!
//! This module provides:
//! - [`Task`] - the persisted unit of work
//! - [`TaskId`] / [`PayloadRef`] - opaque identity and payload reference
//! - [`TaskStatus`] - the lifecycle and its legal transitions

mod model;
mod status;

pub(crate) use model::not_before;
pub use model::{PayloadRef, Task, TaskId};
pub use status::TaskStatus;
