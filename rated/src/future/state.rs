//! Shared future state machine
//!
//! One [`FutureCore`] backs every future variant. The [`Expected`] tag decides
//! how many executions complete the future; waiting, cancellation and result
//! retrieval are shared.

use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{ExecutorError, Result, TaskFailure};
use crate::task::TaskWrapper;

use super::TaskCanceller;

/// Outcome of a single execution
pub type Outcome<V> = std::result::Result<V, TaskFailure>;

/// How many executions a future expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// Exactly one execution
    Single,
    /// A fixed number of executions
    Bounded(usize),
    /// Repeats until cancelled
    Unbounded,
}

impl Expected {
    /// Whether `completed` executions exhaust this future
    pub fn is_exhausted(&self, completed: usize) -> bool {
        match self {
            Self::Single => completed >= 1,
            Self::Bounded(n) => completed >= *n,
            Self::Unbounded => false,
        }
    }

    /// Number of executions expected, if finite
    pub fn count(&self) -> Option<usize> {
        match self {
            Self::Single => Some(1),
            Self::Bounded(n) => Some(*n),
            Self::Unbounded => None,
        }
    }
}

struct FutureState<V> {
    cancelled: bool,
    completed: usize,
    latest: Option<Outcome<V>>,
    /// Every outcome in execution order (bounded futures only)
    history: Vec<Outcome<V>>,
}

/// State machine shared by a future handle and its task's result handler
pub struct FutureCore<V> {
    expected: Expected,
    state: Mutex<FutureState<V>>,
    ready: Condvar,
    canceller: Weak<dyn TaskCanceller>,
    task: OnceLock<Weak<TaskWrapper>>,
}

impl<V: Clone> FutureCore<V> {
    /// Create a future expecting the given number of executions
    pub fn new(expected: Expected, canceller: Weak<dyn TaskCanceller>) -> Self {
        let history = match expected {
            Expected::Bounded(n) => Vec::with_capacity(n),
            _ => Vec::new(),
        };
        Self {
            expected,
            state: Mutex::new(FutureState {
                cancelled: false,
                completed: 0,
                latest: None,
                history,
            }),
            ready: Condvar::new(),
            canceller,
            task: OnceLock::new(),
        }
    }

    /// Bind the wrapper this future reports on
    ///
    /// Only the first binding takes effect.
    pub fn bind(&self, task: &Arc<TaskWrapper>) {
        debug!(task_id = %task.id(), "FutureCore::bind: called");
        let _ = self.task.set(Arc::downgrade(task));
    }

    pub fn expected(&self) -> Expected {
        self.expected
    }

    pub fn completed(&self) -> usize {
        self.state.lock().completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub fn is_done(&self) -> bool {
        let state = self.state.lock();
        state.cancelled || self.expected.is_exhausted(state.completed)
    }

    /// Attempt to cancel the task behind this future
    ///
    /// Returns false when already done or when the canceller refuses (the task
    /// is executing and cannot be interrupted). The state lock is held across
    /// the canceller call, so an execution finishing concurrently is either
    /// recorded first (and the cancel fails) or ignored.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        debug!(may_interrupt, "FutureCore::cancel: called");
        let Some(canceller) = self.canceller.upgrade() else {
            debug!("FutureCore::cancel: executor gone");
            return false;
        };

        let mut state = self.state.lock();
        if state.cancelled || self.expected.is_exhausted(state.completed) {
            debug!("FutureCore::cancel: already done");
            return false;
        }

        let task = self.task.get().cloned().unwrap_or_default();
        if !canceller.cancel_task(&task, may_interrupt) {
            debug!("FutureCore::cancel: canceller refused");
            return false;
        }
        state.cancelled = true;
        drop(state);

        self.ready.notify_all();
        true
    }

    /// Mark cancelled without consulting the canceller
    ///
    /// Used when the executor is torn down with this task still queued.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        if state.cancelled || self.expected.is_exhausted(state.completed) {
            return;
        }
        debug!("FutureCore::abandon: marking cancelled");
        state.cancelled = true;
        drop(state);
        self.ready.notify_all();
    }

    pub fn set_result(&self, value: V) {
        self.record(Ok(value));
    }

    pub fn set_failure(&self, failure: TaskFailure) {
        self.record(Err(failure));
    }

    /// Record the outcome of one execution
    ///
    /// Ignored once the future is cancelled or exhausted.
    fn record(&self, outcome: Outcome<V>) {
        let mut state = self.state.lock();
        if state.cancelled || self.expected.is_exhausted(state.completed) {
            debug!(completed = state.completed, "FutureCore::record: terminal, ignoring outcome");
            return;
        }

        if let Expected::Bounded(_) = self.expected {
            state.history.push(outcome.clone());
        }
        state.latest = Some(outcome);
        state.completed += 1;
        debug!(completed = state.completed, "FutureCore::record: recorded outcome");
        drop(state);

        self.ready.notify_all();
    }

    /// Block until an execution has completed, then return the latest outcome
    pub fn get(&self) -> Result<V> {
        let mut state = self.state.lock();
        while !state.cancelled && state.latest.is_none() {
            self.ready.wait(&mut state);
        }
        Self::resolve(&state, state.latest.as_ref())
    }

    /// As [`get`](Self::get), giving up after `timeout`
    pub fn get_timeout(&self, timeout: Duration) -> Result<V> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.get();
        };
        let mut state = self.state.lock();
        while !state.cancelled && state.latest.is_none() {
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                if state.cancelled || state.latest.is_some() {
                    break;
                }
                return Err(ExecutorError::Timeout(timeout));
            }
        }
        Self::resolve(&state, state.latest.as_ref())
    }

    /// Block until execution `index` has completed and return its outcome
    pub fn get_result(&self, index: usize) -> Result<V> {
        self.get_result_until(index, None, Duration::ZERO)
    }

    /// As [`get_result`](Self::get_result), giving up after `timeout`
    pub fn get_result_timeout(&self, index: usize, timeout: Duration) -> Result<V> {
        // A deadline past the clock's range waits without one
        self.get_result_until(index, Instant::now().checked_add(timeout), timeout)
    }

    fn get_result_until(&self, index: usize, deadline: Option<Instant>, timeout: Duration) -> Result<V> {
        let Expected::Bounded(expected) = self.expected else {
            return Err(ExecutorError::InvalidArgument(
                "per-execution results are only kept for bounded futures".to_string(),
            ));
        };
        if index >= expected {
            return Err(ExecutorError::IndexOutOfBounds { index, expected });
        }

        let mut state = self.state.lock();
        while state.completed <= index && !state.cancelled {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out()
                        && state.completed <= index
                        && !state.cancelled
                    {
                        return Err(ExecutorError::Timeout(timeout));
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }

        match state.history.get(index) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(failure)) => Err(ExecutorError::Execution(failure.clone())),
            None => Err(ExecutorError::Cancelled),
        }
    }

    fn resolve(state: &FutureState<V>, outcome: Option<&Outcome<V>>) -> Result<V> {
        if state.cancelled {
            return Err(ExecutorError::Cancelled);
        }
        match outcome {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(failure)) => Err(ExecutorError::Execution(failure.clone())),
            None => Err(ExecutorError::Cancelled),
        }
    }
}
