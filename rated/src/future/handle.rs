//! Caller-facing future handles

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

use super::state::{Expected, FutureCore};

/// Handle to a single-shot or unbounded repeating task
///
/// Cloning the handle shares the same underlying state.
pub struct TaskFuture<V> {
    core: Arc<FutureCore<V>>,
}

impl<V: Clone> TaskFuture<V> {
    pub(crate) fn new(core: Arc<FutureCore<V>>) -> Self {
        Self { core }
    }

    /// Attempt to cancel the task
    ///
    /// Fails when the task is already done, or when it is executing right now
    /// and either `may_interrupt` is false or the executor cannot interrupt it.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.core.cancel(may_interrupt)
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Done once cancelled or, for single-shot tasks, once executed
    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// Block until the task has executed and return its (latest) result
    pub fn get(&self) -> Result<V> {
        self.core.get()
    }

    /// As [`get`](Self::get), failing with a timeout after `timeout`
    pub fn get_timeout(&self, timeout: Duration) -> Result<V> {
        self.core.get_timeout(timeout)
    }

    /// Whether this handle repeats until cancelled
    pub fn is_repeating(&self) -> bool {
        self.core.expected() == Expected::Unbounded
    }
}

impl<V> Clone for TaskFuture<V> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<V: Clone> fmt::Debug for TaskFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("expected", &self.core.expected())
            .field("completed", &self.core.completed())
            .field("cancelled", &self.core.is_cancelled())
            .finish()
    }
}

/// Handle to a task repeated a fixed number of times
pub struct RepeatingFuture<V> {
    core: Arc<FutureCore<V>>,
    expected: usize,
}

impl<V: Clone> RepeatingFuture<V> {
    pub(crate) fn new(core: Arc<FutureCore<V>>) -> Self {
        let expected = core.expected().count().unwrap_or(0);
        Self { core, expected }
    }

    /// Attempt to cancel the remaining executions
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.core.cancel(may_interrupt)
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Done once every execution has completed or the task was cancelled
    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// Block until at least one execution has completed and return the latest result
    pub fn get(&self) -> Result<V> {
        self.core.get()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<V> {
        self.core.get_timeout(timeout)
    }

    /// Block until execution `index` (zero-based) completes and return its result
    pub fn get_result(&self, index: usize) -> Result<V> {
        self.core.get_result(index)
    }

    pub fn get_result_timeout(&self, index: usize, timeout: Duration) -> Result<V> {
        self.core.get_result_timeout(index, timeout)
    }

    pub fn expected_executions(&self) -> usize {
        self.expected
    }

    pub fn completed_executions(&self) -> usize {
        self.core.completed()
    }
}

impl<V> Clone for RepeatingFuture<V> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            expected: self.expected,
        }
    }
}

impl<V: Clone> fmt::Debug for RepeatingFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatingFuture")
            .field("expected", &self.expected)
            .field("completed", &self.core.completed())
            .field("cancelled", &self.core.is_cancelled())
            .finish()
    }
}
