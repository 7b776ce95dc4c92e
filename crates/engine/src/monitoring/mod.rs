//! Monitoring surface
//!
//! [`StateReporter`] exposes a read-only [`EngineState`] for management
//! consoles. Reading never blocks worker loops.

mod reporter;

pub use reporter::{
    EngineHealth, EngineState, StateReporter, WorkerActivity, WorkerState, ENGINE_STATE_NAME,
};
