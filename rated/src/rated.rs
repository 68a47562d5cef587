//! Rated executor - the public submission API
//!
//! Every submission creates a future, wraps the task together with a result
//! handler bound to that future and hands the wrapper to the internal
//! executor. The handler re-submits repeating tasks until their future is
//! done and otherwise lets the executor go idle.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{Pacing, RatedConfig};
use crate::error::{BoxError, ExecutorError, Result, TaskFailure};
use crate::executor::{self, InternalExecutor};
use crate::future::{Expected, FutureCore, RepeatingFuture, TaskCanceller, TaskFuture};
use crate::queue::{TaskQueue, Withdrawal};
use crate::task::{ResultHandler, TaskWrapper};

/// State shared by the facade and, weakly, by futures and result handlers
struct RatedInner {
    queue: Arc<TaskQueue>,
    executor: Arc<dyn InternalExecutor>,
    rate: Duration,
}

impl TaskCanceller for RatedInner {
    fn cancel_task(&self, task: &Weak<TaskWrapper>, may_interrupt: bool) -> bool {
        debug!(may_interrupt, "RatedExecutor::cancel_task: called");
        match self.queue.withdraw(task) {
            Ok(Withdrawal::Removed) | Ok(Withdrawal::NotQueued) => true,
            Ok(Withdrawal::Executing) => {
                if !may_interrupt || !self.executor.pacing().supports_interrupt() {
                    debug!("RatedExecutor::cancel_task: task executing, interrupt not available");
                    return false;
                }
                self.executor.interrupt()
            }
            Err(e) => {
                debug!(error = %e, "RatedExecutor::cancel_task: rejected");
                false
            }
        }
    }
}

impl Drop for RatedInner {
    fn drop(&mut self) {
        debug!("RatedExecutor::drop: called");
        self.executor.stop();
        for task in self.queue.drain() {
            task.abandon();
        }
    }
}

/// Records outcomes on a future and re-submits until the future is done
struct Resubmit<V> {
    future: Arc<FutureCore<V>>,
    owner: Weak<RatedInner>,
}

impl<V: Clone + Send + 'static> Resubmit<V> {
    fn after_run(&self, task: &Arc<TaskWrapper>) {
        let Some(owner) = self.owner.upgrade() else {
            debug!(task_id = %task.id(), "Resubmit::after_run: executor gone");
            self.future.abandon();
            return;
        };
        if self.future.is_done() {
            owner.executor.request_stop();
        } else {
            owner.executor.submit(task.clone());
        }
    }
}

impl<V: Clone + Send + 'static> ResultHandler<V> for Resubmit<V> {
    fn on_result(&self, task: &Arc<TaskWrapper>, value: V) {
        self.future.set_result(value);
        self.after_run(task);
    }

    fn on_failure(&self, task: &Arc<TaskWrapper>, failure: TaskFailure) {
        self.future.set_failure(failure);
        self.after_run(task);
    }

    fn is_cancelled(&self) -> bool {
        self.future.is_cancelled()
    }

    fn on_skipped(&self, _task: &Arc<TaskWrapper>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.executor.request_stop();
        }
    }

    fn on_abandoned(&self) {
        self.future.abandon();
    }
}

/// Handler for fire-and-forget tasks: failures go to the log
struct Discard {
    owner: Weak<RatedInner>,
}

impl Discard {
    fn idle(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.executor.request_stop();
        }
    }
}

impl ResultHandler<()> for Discard {
    fn on_result(&self, _task: &Arc<TaskWrapper>, _value: ()) {
        self.idle();
    }

    fn on_failure(&self, task: &Arc<TaskWrapper>, failure: TaskFailure) {
        warn!(task_id = %task.id(), %failure, "RatedExecutor::execute: task failed");
        self.idle();
    }
}

/// Executor that starts queued tasks no more often than once per rate period
///
/// Tasks run one at a time in submission order; repeating tasks re-enter the
/// queue at the tail after each execution. Dropping the executor stops it and
/// cancels every task still waiting in the queue.
///
/// ```no_run
/// use std::time::Duration;
/// use rated::RatedExecutor;
///
/// let executor = RatedExecutor::new(Duration::from_millis(100))?;
/// let future = executor.submit_callable(|| Ok::<_, std::io::Error>(6 * 7));
/// assert_eq!(future.get()?, 42);
/// # Ok::<(), rated::ExecutorError>(())
/// ```
pub struct RatedExecutor {
    inner: Arc<RatedInner>,
}

impl RatedExecutor {
    /// Timer-paced executor; in-flight tasks cannot be interrupted
    pub fn new(rate: Duration) -> Result<Self> {
        Self::build(Pacing::Timer, rate, None)
    }

    /// Loop-paced executor supporting best-effort interruption of the running task
    pub fn interruptible(rate: Duration) -> Result<Self> {
        Self::build(Pacing::Loop, rate, None)
    }

    /// Executor built from configuration
    pub fn with_config(config: &RatedConfig) -> Result<Self> {
        Self::build(config.pacing, config.rate(), config.thread_name.as_deref())
    }

    fn build(pacing: Pacing, rate: Duration, thread_name: Option<&str>) -> Result<Self> {
        debug!(?rate, %pacing, "RatedExecutor::build: called");
        let queue = Arc::new(TaskQueue::new());
        let executor = executor::build(pacing, rate, thread_name, queue.clone())?;
        Ok(Self {
            inner: Arc::new(RatedInner { queue, executor, rate }),
        })
    }

    /// Run a procedure once without returning a future
    ///
    /// A failure or panic is logged and otherwise dropped.
    pub fn execute<F>(&self, task: F)
    where
        F: FnMut() + Send + 'static,
    {
        debug!("RatedExecutor::execute: called");
        let handler = Discard {
            owner: Arc::downgrade(&self.inner),
        };
        self.inner.executor.submit(TaskWrapper::procedure(task, handler));
    }

    /// Run a procedure once
    pub fn submit<F>(&self, task: F) -> TaskFuture<()>
    where
        F: FnMut() + Send + 'static,
    {
        debug!("RatedExecutor::submit: called");
        TaskFuture::new(self.enqueue(Expected::Single, procedure(task)))
    }

    /// Run a value-producing task once
    pub fn submit_callable<V, E, F>(&self, task: F) -> TaskFuture<V>
    where
        V: Clone + Send + 'static,
        E: Into<BoxError> + 'static,
        F: FnMut() -> std::result::Result<V, E> + Send + 'static,
    {
        debug!("RatedExecutor::submit_callable: called");
        TaskFuture::new(self.enqueue(Expected::Single, callable(task)))
    }

    /// Run a procedure repeatedly until the returned future is cancelled
    pub fn schedule<F>(&self, task: F) -> TaskFuture<()>
    where
        F: FnMut() + Send + 'static,
    {
        debug!("RatedExecutor::schedule: called");
        TaskFuture::new(self.enqueue(Expected::Unbounded, procedure(task)))
    }

    /// Run a procedure exactly `times` times, or until cancelled
    pub fn schedule_times<F>(&self, task: F, times: usize) -> Result<RepeatingFuture<()>>
    where
        F: FnMut() + Send + 'static,
    {
        debug!(times, "RatedExecutor::schedule_times: called");
        let expected = bounded(times)?;
        Ok(RepeatingFuture::new(self.enqueue(expected, procedure(task))))
    }

    /// Run a value-producing task exactly `times` times, or until cancelled
    pub fn schedule_callable<V, E, F>(&self, task: F, times: usize) -> Result<RepeatingFuture<V>>
    where
        V: Clone + Send + 'static,
        E: Into<BoxError> + 'static,
        F: FnMut() -> std::result::Result<V, E> + Send + 'static,
    {
        debug!(times, "RatedExecutor::schedule_callable: called");
        let expected = bounded(times)?;
        Ok(RepeatingFuture::new(self.enqueue(expected, callable(task))))
    }

    pub fn rate(&self) -> Duration {
        self.inner.rate
    }

    pub fn pacing(&self) -> Pacing {
        self.inner.executor.pacing()
    }

    /// Number of tasks waiting in the queue
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Whether the pacing loop is active
    pub fn is_running(&self) -> bool {
        self.inner.executor.is_running()
    }

    fn enqueue<V, F>(&self, expected: Expected, task: F) -> Arc<FutureCore<V>>
    where
        V: Clone + Send + 'static,
        F: FnMut() -> std::result::Result<V, TaskFailure> + Send + 'static,
    {
        let owner: Weak<RatedInner> = Arc::downgrade(&self.inner);
        let canceller: Weak<dyn TaskCanceller> = owner.clone();
        let future = Arc::new(FutureCore::new(expected, canceller));
        let handler = Resubmit {
            future: future.clone(),
            owner,
        };

        let wrapper = TaskWrapper::new(task, handler);
        debug!(task_id = %wrapper.id(), ?expected, "RatedExecutor::enqueue: submitting");
        future.bind(&wrapper);
        self.inner.executor.submit(wrapper);
        future
    }
}

impl std::fmt::Debug for RatedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatedExecutor")
            .field("rate", &self.inner.rate)
            .field("pacing", &self.pacing())
            .field("pending", &self.pending())
            .finish()
    }
}

fn bounded(times: usize) -> Result<Expected> {
    if times == 0 {
        return Err(ExecutorError::InvalidArgument(
            "a repeating task must run at least once".to_string(),
        ));
    }
    Ok(Expected::Bounded(times))
}

fn procedure<F>(mut task: F) -> impl FnMut() -> std::result::Result<(), TaskFailure> + Send + 'static
where
    F: FnMut() + Send + 'static,
{
    move || {
        task();
        Ok(())
    }
}

fn callable<V, E, F>(mut task: F) -> impl FnMut() -> std::result::Result<V, TaskFailure> + Send + 'static
where
    V: 'static,
    E: Into<BoxError> + 'static,
    F: FnMut() -> std::result::Result<V, E> + Send + 'static,
{
    move || task().map_err(TaskFailure::new)
}
