//! Loop-paced executor
//!
//! A dedicated worker thread runs one task per iteration and then parks until
//! the next intended start. The intended start advances by exactly one period
//! from the previous intended start, so scheduling jitter averages out instead
//! of accumulating. The running task can be interrupted through
//! [`crate::interrupt`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::Pacing;
use crate::interrupt::{self, InterruptSignal};
use crate::queue::TaskQueue;
use crate::task::TaskWrapper;

use super::InternalExecutor;

const DEFAULT_THREAD_NAME: &str = "rated-loop";

struct LoopShared {
    queue: Arc<TaskQueue>,
    rate: Duration,
    running: AtomicBool,
    stopping: AtomicBool,
    /// Set only while a task body is executing
    interruptable: AtomicBool,
    /// Hard stop: the worker exits even with work queued
    halted: AtomicBool,
    closed: AtomicBool,
    signal: Mutex<Option<Arc<InterruptSignal>>>,
}

impl LoopShared {
    fn run(&self) {
        let signal = interrupt::register();
        *self.signal.lock() = Some(signal.clone());
        debug!(rate = ?self.rate, "LoopExecutor::run: worker started");

        let mut target = Instant::now();
        while !self.closed.load(Ordering::Acquire) {
            match self.queue.poll() {
                Some(task) => self.run_task(&task, &signal),
                None => {
                    debug!("LoopExecutor::run: queue empty, idling");
                    self.stopping.store(true, Ordering::Release);
                }
            }

            target += self.rate;
            let now = Instant::now();
            if target < now {
                debug!(behind = ?(now - target), "LoopExecutor::run: overran period");
                target = now;
            }
            self.sleep_until(target);

            if self.stopping.load(Ordering::Acquire) && !self.reclaim() {
                break;
            }
        }

        let mut slot = self.signal.lock();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &signal)) {
            *slot = None;
        }
        drop(slot);
        interrupt::unregister();
        debug!("LoopExecutor::run: worker exiting");
    }

    fn run_task(&self, task: &Arc<TaskWrapper>, signal: &InterruptSignal) {
        debug!(task_id = %task.id(), "LoopExecutor::run_task: executing");
        signal.clear();
        self.interruptable.store(true, Ordering::SeqCst);
        task.execute();
        self.interruptable.store(false, Ordering::SeqCst);
        self.queue.clear_current();

        if signal.clear() {
            debug!(task_id = %task.id(), "LoopExecutor::run_task: discarded interrupt");
        }
        interrupt::drain_wakeup();
    }

    /// Park until `target`, ignoring early wake-ups unless closed
    fn sleep_until(&self, target: Instant) {
        while !self.closed.load(Ordering::Acquire) && Instant::now() < target {
            interrupt::park_until(target);
        }
    }

    /// Give up the running flag, taking it back if work arrived meanwhile
    ///
    /// Returns whether this worker keeps going.
    fn reclaim(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        if self.closed.load(Ordering::Acquire) || self.halted.load(Ordering::Acquire) || self.queue.is_empty() {
            return false;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("LoopExecutor::reclaim: another worker took over");
            return false;
        }
        debug!("LoopExecutor::reclaim: work arrived, continuing");
        self.stopping.store(false, Ordering::Release);
        true
    }
}

/// Internal executor driven by a dedicated worker loop
///
/// Supports best-effort interruption of the running task.
pub struct LoopExecutor {
    shared: Arc<LoopShared>,
    thread_name: String,
}

impl LoopExecutor {
    /// Create an idle executor; a worker starts on first submit
    pub fn new(queue: Arc<TaskQueue>, rate: Duration, thread_name: Option<&str>) -> Self {
        debug!(?rate, ?thread_name, "LoopExecutor::new: called");
        Self {
            shared: Arc::new(LoopShared {
                queue,
                rate,
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                interruptable: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                signal: Mutex::new(None),
            }),
            thread_name: thread_name.unwrap_or(DEFAULT_THREAD_NAME).to_string(),
        }
    }

    fn spawn_worker(&self) {
        debug!(thread_name = %self.thread_name, "LoopExecutor::spawn_worker: called");
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || shared.run());
        if let Err(e) = spawned {
            warn!(error = %e, "LoopExecutor::spawn_worker: failed to start worker thread");
            self.shared.running.store(false, Ordering::SeqCst);
        }
    }
}

impl InternalExecutor for LoopExecutor {
    fn submit(&self, task: Arc<TaskWrapper>) {
        debug!(task_id = %task.id(), "LoopExecutor::submit: called");
        self.shared.queue.add(task);
        self.shared.halted.store(false, Ordering::Release);
        self.shared.stopping.store(false, Ordering::Release);
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.spawn_worker();
        }
    }

    fn request_stop(&self) {
        debug!("LoopExecutor::request_stop: called");
        if self.shared.queue.is_empty() {
            self.shared.stopping.store(true, Ordering::Release);
        }
    }

    fn stop(&self) {
        debug!("LoopExecutor::stop: called");
        self.shared.halted.store(true, Ordering::Release);
        self.shared.stopping.store(true, Ordering::Release);
    }

    /// Best effort: the task may return just after the flag is read
    fn interrupt(&self) -> bool {
        if !self.shared.interruptable.load(Ordering::SeqCst) {
            debug!("LoopExecutor::interrupt: no task in flight");
            return false;
        }
        match self.shared.signal.lock().as_ref() {
            Some(signal) => {
                debug!("LoopExecutor::interrupt: raising signal");
                signal.raise();
                true
            }
            None => false,
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn pacing(&self) -> Pacing {
        Pacing::Loop
    }
}

impl Drop for LoopExecutor {
    fn drop(&mut self) {
        debug!("LoopExecutor::drop: called");
        self.shared.closed.store(true, Ordering::Release);
        self.shared.stopping.store(true, Ordering::Release);
        if let Some(signal) = self.shared.signal.lock().as_ref() {
            signal.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Interrupted, TaskFailure};
    use crate::task::ResultHandler;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Default)]
    struct Record {
        ok: Arc<AtomicUsize>,
        failed: Arc<Mutex<Vec<TaskFailure>>>,
    }

    impl ResultHandler<()> for Record {
        fn on_result(&self, _task: &Arc<TaskWrapper>, _value: ()) {
            self.ok.fetch_add(1, Ordering::SeqCst);
        }
        fn on_failure(&self, _task: &Arc<TaskWrapper>, failure: TaskFailure) {
            self.failed.lock().push(failure);
        }
    }

    fn executor(rate_ms: u64) -> (LoopExecutor, Arc<TaskQueue>) {
        let queue = Arc::new(TaskQueue::new());
        let executor = LoopExecutor::new(queue.clone(), Duration::from_millis(rate_ms), Some("loop-test"));
        (executor, queue)
    }

    fn wait_for(deadline: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + deadline;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_runs_tasks_on_named_worker() {
        let (executor, _queue) = executor(10);
        let record = Record::default();
        let name = Arc::new(Mutex::new(None));
        let seen = name.clone();
        executor.submit(TaskWrapper::procedure(
            move || *seen.lock() = thread::current().name().map(str::to_string),
            record.clone(),
        ));

        assert!(wait_for(Duration::from_secs(1), || record.ok.load(Ordering::SeqCst) == 1));
        assert_eq!(name.lock().as_deref(), Some("loop-test"));
    }

    #[test]
    fn test_spacing_between_starts() {
        let (executor, _queue) = executor(40);
        let starts = Arc::new(Mutex::new(Vec::new()));
        let record = Record::default();
        for _ in 0..3 {
            let starts = starts.clone();
            executor.submit(TaskWrapper::procedure(move || starts.lock().push(Instant::now()), record.clone()));
        }

        assert!(wait_for(Duration::from_secs(1), || record.ok.load(Ordering::SeqCst) == 3));
        let starts = starts.lock();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(35));
        }
    }

    #[test]
    fn test_worker_exits_when_idle_and_restarts() {
        let (executor, _queue) = executor(10);
        let record = Record::default();
        executor.submit(TaskWrapper::procedure(|| {}, record.clone()));
        assert!(executor.is_running());

        assert!(wait_for(Duration::from_secs(1), || !executor.is_running()));
        assert_eq!(record.ok.load(Ordering::SeqCst), 1);

        executor.submit(TaskWrapper::procedure(|| {}, record.clone()));
        assert!(wait_for(Duration::from_secs(1), || record.ok.load(Ordering::SeqCst) == 2));
    }

    #[test]
    fn test_interrupt_reaches_running_task() {
        let (executor, _queue) = executor(10);
        let record = Record::default();
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        executor.submit(TaskWrapper::new(
            move || {
                flag.store(true, Ordering::SeqCst);
                interrupt::sleep(Duration::from_secs(5)).map_err(TaskFailure::new)
            },
            record.clone(),
        ));

        assert!(wait_for(Duration::from_secs(1), || started.load(Ordering::SeqCst)));
        assert!(executor.interrupt());
        assert!(wait_for(Duration::from_secs(1), || !record.failed.lock().is_empty()));
        let failed = record.failed.lock();
        assert!(failed[0].downcast_ref::<Interrupted>().is_some());
    }

    #[test]
    fn test_interrupt_without_running_task() {
        let (executor, _queue) = executor(10);
        assert!(!executor.interrupt());
        assert_eq!(executor.pacing(), Pacing::Loop);
    }

    #[test]
    fn test_stop_leaves_queue_untouched() {
        let (executor, queue) = executor(30);
        let record = Record::default();
        for _ in 0..3 {
            executor.submit(TaskWrapper::procedure(|| {}, record.clone()));
        }
        thread::sleep(Duration::from_millis(10));
        executor.stop();

        assert!(wait_for(Duration::from_secs(1), || !executor.is_running()));
        thread::sleep(Duration::from_millis(60));
        assert!(record.ok.load(Ordering::SeqCst) < 3);
        assert!(!queue.is_empty());
    }
}
