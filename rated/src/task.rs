//! Task wrapper - the unit moved through the task queue
//!
//! A [`TaskWrapper`] binds one task body to one [`ResultHandler`]. Wrappers are
//! compared by reference identity: two wrappers around equal closures are
//! distinct tasks.

use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::TaskFailure;

/// Receives the outcome of each execution of a task
pub trait ResultHandler<V>: Send + Sync + 'static {
    /// The task produced a value
    fn on_result(&self, task: &Arc<TaskWrapper>, value: V);

    /// The task returned an error or panicked
    fn on_failure(&self, task: &Arc<TaskWrapper>, failure: TaskFailure);

    /// Whether the task should be skipped instead of run
    fn is_cancelled(&self) -> bool {
        false
    }

    /// The task was skipped because it was already cancelled
    fn on_skipped(&self, _task: &Arc<TaskWrapper>) {}

    /// The task will never run again because its executor went away
    fn on_abandoned(&self) {}
}

/// Type-erased task body plus handler
trait Job: Send + Sync {
    fn run(&self, wrapper: &Arc<TaskWrapper>);
    fn abandon(&self);
}

struct BoundJob<V, F, H> {
    task: Mutex<F>,
    handler: H,
    _value: PhantomData<fn() -> V>,
}

impl<V, F, H> Job for BoundJob<V, F, H>
where
    V: 'static,
    F: FnMut() -> Result<V, TaskFailure> + Send + 'static,
    H: ResultHandler<V>,
{
    fn run(&self, wrapper: &Arc<TaskWrapper>) {
        if self.handler.is_cancelled() {
            debug!(task_id = %wrapper.id(), "TaskWrapper::execute: already cancelled, skipping");
            self.handler.on_skipped(wrapper);
            return;
        }

        // The body lock is released before the handler sees the outcome
        let outcome = {
            let mut task = self.task.lock();
            panic::catch_unwind(AssertUnwindSafe(|| (*task)()))
        };
        match outcome {
            Ok(Ok(value)) => self.handler.on_result(wrapper, value),
            Ok(Err(failure)) => {
                debug!(task_id = %wrapper.id(), %failure, "TaskWrapper::execute: task returned error");
                self.handler.on_failure(wrapper, failure);
            }
            Err(payload) => {
                let failure = TaskFailure::from_panic(payload);
                debug!(task_id = %wrapper.id(), %failure, "TaskWrapper::execute: task panicked");
                self.handler.on_failure(wrapper, failure);
            }
        }
    }

    fn abandon(&self) {
        self.handler.on_abandoned();
    }
}

/// Adapter binding a task body to its result handler
pub struct TaskWrapper {
    id: Uuid,
    job: Box<dyn Job>,
}

impl TaskWrapper {
    /// Wrap a value-producing task
    pub fn new<V, F, H>(task: F, handler: H) -> Arc<Self>
    where
        V: 'static,
        F: FnMut() -> Result<V, TaskFailure> + Send + 'static,
        H: ResultHandler<V>,
    {
        let id = Uuid::now_v7();
        debug!(task_id = %id, "TaskWrapper::new: called");
        Arc::new(Self {
            id,
            job: Box::new(BoundJob {
                task: Mutex::new(task),
                handler,
                _value: PhantomData,
            }),
        })
    }

    /// Wrap a procedure, reporting `()` on success
    pub fn procedure<F, H>(mut task: F, handler: H) -> Arc<Self>
    where
        F: FnMut() + Send + 'static,
        H: ResultHandler<()>,
    {
        Self::new(
            move || {
                task();
                Ok(())
            },
            handler,
        )
    }

    /// Identifier used in log output
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the task and hand its outcome to the handler
    ///
    /// Never propagates a failure or panic from the task body.
    pub fn execute(self: &Arc<Self>) {
        debug!(task_id = %self.id, "TaskWrapper::execute: called");
        self.job.run(self);
    }

    /// Tell the handler this task will never run again
    pub fn abandon(&self) {
        debug!(task_id = %self.id, "TaskWrapper::abandon: called");
        self.job.abandon();
    }
}

impl fmt::Debug for TaskWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskWrapper").field("id", &self.id).finish_non_exhaustive()
    }
}

impl PartialEq for TaskWrapper {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for TaskWrapper {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("test failure")]
    struct TestError;

    /// Handler that records everything it is told
    #[derive(Clone, Default)]
    struct RecordingHandler {
        results: Arc<Mutex<Vec<Result<i32, TaskFailure>>>>,
        skipped: Arc<AtomicUsize>,
        abandoned: Arc<AtomicUsize>,
        cancelled: bool,
    }

    impl ResultHandler<i32> for RecordingHandler {
        fn on_result(&self, _task: &Arc<TaskWrapper>, value: i32) {
            self.results.lock().push(Ok(value));
        }

        fn on_failure(&self, _task: &Arc<TaskWrapper>, failure: TaskFailure) {
            self.results.lock().push(Err(failure));
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled
        }

        fn on_skipped(&self, _task: &Arc<TaskWrapper>) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_abandoned(&self) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ResultHandler<()> for RecordingHandler {
        fn on_result(&self, _task: &Arc<TaskWrapper>, _value: ()) {
            self.results.lock().push(Ok(0));
        }

        fn on_failure(&self, _task: &Arc<TaskWrapper>, failure: TaskFailure) {
            self.results.lock().push(Err(failure));
        }
    }

    #[test]
    fn test_value_task_reports_result() {
        let handler = RecordingHandler::default();
        let mut count: i32 = 0;
        let wrapper = TaskWrapper::new(
            move || {
                count += 1;
                Ok(count)
            },
            handler.clone(),
        );

        wrapper.execute();
        wrapper.execute();

        let results = handler.results.lock();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().ok(), Some(&1));
        assert_eq!(results[1].as_ref().ok(), Some(&2));
    }

    #[test]
    fn test_error_is_reported_not_propagated() {
        let handler = RecordingHandler::default();
        let wrapper = TaskWrapper::new(|| Err::<i32, _>(TaskFailure::new(TestError)), handler.clone());

        wrapper.execute();

        let results = handler.results.lock();
        let failure = results[0].as_ref().unwrap_err();
        assert!(failure.downcast_ref::<TestError>().is_some());
    }

    #[test]
    fn test_panic_is_reported_not_propagated() {
        let handler = RecordingHandler::default();
        let wrapper = TaskWrapper::procedure(|| panic!("procedure exploded"), handler.clone());

        wrapper.execute();

        let results = handler.results.lock();
        let failure = results[0].as_ref().unwrap_err();
        assert!(failure.is_panic());
        assert!(failure.to_string().contains("procedure exploded"));
    }

    #[test]
    fn test_procedure_reports_unit() {
        let handler = RecordingHandler::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let wrapper = TaskWrapper::procedure(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            handler.clone(),
        );

        wrapper.execute();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(handler.results.lock()[0].is_ok());
    }

    #[test]
    fn test_cancelled_handler_skips_task() {
        let handler = RecordingHandler {
            cancelled: true,
            ..Default::default()
        };
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let wrapper = TaskWrapper::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<i32, TaskFailure>(1)
            },
            handler.clone(),
        );

        wrapper.execute();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(handler.skipped.load(Ordering::SeqCst), 1);
        assert!(handler.results.lock().is_empty());
    }

    #[test]
    fn test_abandon_notifies_handler() {
        let handler = RecordingHandler::default();
        let wrapper = TaskWrapper::new(|| Ok::<i32, TaskFailure>(1), handler.clone());
        wrapper.abandon();
        assert_eq!(handler.abandoned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identity_equality() {
        let a = TaskWrapper::new(|| Ok::<i32, TaskFailure>(1), RecordingHandler::default());
        let b = TaskWrapper::new(|| Ok::<i32, TaskFailure>(1), RecordingHandler::default());
        assert_eq!(*a, *a.clone());
        assert_ne!(*a, *b);
        assert_ne!(a.id(), b.id());
    }
}
