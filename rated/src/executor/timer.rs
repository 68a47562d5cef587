//! Timer-paced executor
//!
//! A dedicated single-worker tokio runtime ticks at the rate period and runs
//! one queued task per tick. When the queue drains, the ticker is kept alive
//! for one more period so that a submission arriving inside that grace
//! window does not tear the timer down and restart it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::config::Pacing;
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::task::TaskWrapper;

use super::InternalExecutor;

const DEFAULT_THREAD_NAME: &str = "rated-timer";

#[derive(Default)]
struct TimerState {
    running: bool,
    ticker: Option<JoinHandle<()>>,
    stopping: Option<JoinHandle<()>>,
}

struct TimerShared {
    queue: Arc<TaskQueue>,
    rate: Duration,
    handle: Handle,
    state: Mutex<TimerState>,
}

impl TimerShared {
    /// Run at most one queued task
    fn tick(&self) {
        let Some(task) = self.queue.poll() else {
            return;
        };
        debug!(task_id = %task.id(), "TimerExecutor::tick: executing");
        task.execute();
        self.queue.clear_current();
    }

    /// Stop after the grace period unless work arrived meanwhile
    fn finish_grace(&self) {
        let mut state = self.state.lock();
        state.stopping = None;
        if !self.queue.is_empty() {
            debug!("TimerExecutor::finish_grace: work arrived, staying up");
            return;
        }
        debug!("TimerExecutor::finish_grace: stopping ticker");
        Self::halt(&mut state);
    }

    fn halt(state: &mut TimerState) {
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        if let Some(stopping) = state.stopping.take() {
            stopping.abort();
        }
        state.running = false;
    }
}

async fn run_ticker(shared: Arc<TimerShared>) {
    let mut interval = time::interval(shared.rate);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        shared.tick();
    }
}

/// Internal executor driven by a fixed-rate timer
///
/// In-flight tasks cannot be interrupted.
pub struct TimerExecutor {
    shared: Arc<TimerShared>,
    runtime: Option<Runtime>,
}

impl TimerExecutor {
    /// Start the timer runtime; the ticker itself starts on first submit
    pub fn new(queue: Arc<TaskQueue>, rate: Duration, thread_name: Option<&str>) -> Result<Self> {
        debug!(?rate, ?thread_name, "TimerExecutor::new: called");
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(thread_name.unwrap_or(DEFAULT_THREAD_NAME))
            .enable_time()
            .build()?;

        Ok(Self {
            shared: Arc::new(TimerShared {
                queue,
                rate,
                handle: runtime.handle().clone(),
                state: Mutex::new(TimerState::default()),
            }),
            runtime: Some(runtime),
        })
    }
}

impl InternalExecutor for TimerExecutor {
    fn submit(&self, task: Arc<TaskWrapper>) {
        debug!(task_id = %task.id(), "TimerExecutor::submit: called");
        let mut state = self.shared.state.lock();
        if let Some(stopping) = state.stopping.take() {
            debug!("TimerExecutor::submit: cancelling pending stop");
            stopping.abort();
        }

        self.shared.queue.add(task);

        if !state.running {
            debug!("TimerExecutor::submit: starting ticker");
            state.running = true;
            state.ticker = Some(self.shared.handle.spawn(run_ticker(self.shared.clone())));
        }
    }

    fn request_stop(&self) {
        debug!("TimerExecutor::request_stop: called");
        let mut state = self.shared.state.lock();
        if !state.running || state.stopping.is_some() || !self.shared.queue.is_empty() {
            return;
        }

        let shared = self.shared.clone();
        state.stopping = Some(self.shared.handle.spawn(async move {
            time::sleep(shared.rate).await;
            shared.finish_grace();
        }));
    }

    fn stop(&self) {
        debug!("TimerExecutor::stop: called");
        let mut state = self.shared.state.lock();
        TimerShared::halt(&mut state);
    }

    fn interrupt(&self) -> bool {
        debug!("TimerExecutor::interrupt: not supported");
        false
    }

    fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    fn pacing(&self) -> Pacing {
        Pacing::Timer
    }
}

impl Drop for TimerExecutor {
    fn drop(&mut self) {
        debug!("TimerExecutor::drop: called");
        self.stop();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
