//! Process-isolated execution engine for cute.
//!
//! Every test runs in its own forked process. The scheduler watches the
//! outcome channel and exit status of each unit, kills units whose watchdog
//! expires, classifies how each one ended and folds the result into the run
//! tree in traversal order.
//!
//! This is the only cute crate that calls into libc directly.

pub mod classify;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod scheduler;
mod sys;
pub mod unit;

pub use classify::{
    Classification, KillCause, classify, describe_exit, exit_condition, is_fault_signal, signal_name,
};
pub use config::{DEFAULT_CONSOLE_LIMIT, DEFAULT_TIMEOUT, SchedulerConfig};
pub use error::ExecError;
pub use interrupt::{CancelToken, InterruptGuard, interrupted};
pub use scheduler::{Scheduler, UnitState, run};
pub use unit::{UnitHandle, spawn};
