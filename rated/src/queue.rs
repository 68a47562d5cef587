//! Task queue shared by submitters and the pacing worker
//!
//! Holds pending wrappers in FIFO order plus the wrapper currently being
//! executed. Both live behind one lock so that taking the head and marking it
//! current is a single step: a live wrapper is always either pending or
//! current, never both.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ExecutorError, Result};
use crate::task::TaskWrapper;

/// Outcome of withdrawing a wrapper from the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Withdrawal {
    /// Removed before it could run
    Removed,
    /// Currently executing, left in place
    Executing,
    /// Neither pending nor executing
    NotQueued,
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<Arc<TaskWrapper>>,
    current: Option<Arc<TaskWrapper>>,
}

/// FIFO of pending task wrappers plus the one executing now
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a wrapper to the tail
    ///
    /// Re-adding the current wrapper (a repeat) moves it out of the current slot.
    pub fn add(&self, task: Arc<TaskWrapper>) {
        debug!(task_id = %task.id(), "TaskQueue::add: called");
        let mut inner = self.inner.lock();
        if inner.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &task)) {
            debug!(task_id = %task.id(), "TaskQueue::add: requeueing current task");
            inner.current = None;
        }
        inner.pending.push_back(task);
    }

    /// Take the head of the queue and record it as current
    ///
    /// Records no current task when the queue is empty.
    pub fn poll(&self) -> Option<Arc<TaskWrapper>> {
        let mut inner = self.inner.lock();
        let task = inner.pending.pop_front();
        inner.current = task.clone();
        task
    }

    /// Remove the first pending occurrence of `task`
    pub fn remove(&self, task: &Arc<TaskWrapper>) -> bool {
        debug!(task_id = %task.id(), "TaskQueue::remove: called");
        let mut inner = self.inner.lock();
        Self::remove_pending(&mut inner, task)
    }

    /// Remove `task` unless it is executing, in one step
    pub fn withdraw(&self, task: &Weak<TaskWrapper>) -> Result<Withdrawal> {
        let task = Self::live(task)?;
        let mut inner = self.inner.lock();
        if inner.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &task)) {
            debug!(task_id = %task.id(), "TaskQueue::withdraw: task is executing");
            return Ok(Withdrawal::Executing);
        }
        if Self::remove_pending(&mut inner, &task) {
            debug!(task_id = %task.id(), "TaskQueue::withdraw: removed");
            Ok(Withdrawal::Removed)
        } else {
            debug!(task_id = %task.id(), "TaskQueue::withdraw: not queued");
            Ok(Withdrawal::NotQueued)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn clear_current(&self) {
        self.inner.lock().current = None;
    }

    /// Whether `task` is the wrapper executing now
    ///
    /// A handle whose wrapper no longer exists is rejected.
    pub fn is_current(&self, task: &Weak<TaskWrapper>) -> Result<bool> {
        let task = Self::live(task)?;
        let inner = self.inner.lock();
        Ok(inner.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &task)))
    }

    /// Remove every pending wrapper, leaving the current one alone
    pub fn drain(&self) -> Vec<Arc<TaskWrapper>> {
        let mut inner = self.inner.lock();
        debug!(pending = inner.pending.len(), "TaskQueue::drain: called");
        inner.pending.drain(..).collect()
    }

    fn live(task: &Weak<TaskWrapper>) -> Result<Arc<TaskWrapper>> {
        task.upgrade()
            .ok_or_else(|| ExecutorError::InvalidArgument("task handle does not refer to a live task".to_string()))
    }

    fn remove_pending(inner: &mut QueueInner, task: &Arc<TaskWrapper>) -> bool {
        match inner.pending.iter().position(|t| Arc::ptr_eq(t, task)) {
            Some(index) => {
                inner.pending.remove(index);
                true
            }
            None => false,
        }
    }
}
