//! Futures for rated task submissions
//!
//! A future is created for every submission and bound to the submission's
//! task wrapper. It records the outcome of each execution and lets the caller
//! wait for, inspect or cancel the task.

use std::sync::Weak;

use crate::task::TaskWrapper;

mod handle;
mod state;

pub use handle::{RepeatingFuture, TaskFuture};
pub use state::{Expected, FutureCore, Outcome};

/// Lets a future ask its executor to cancel the task behind it
pub trait TaskCanceller: Send + Sync {
    /// Cancel `task`, interrupting it if it is running and `may_interrupt` is set
    ///
    /// Returns whether the task will not run (again).
    fn cancel_task(&self, task: &Weak<TaskWrapper>, may_interrupt: bool) -> bool;
}
