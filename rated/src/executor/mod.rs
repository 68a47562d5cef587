//! Internal executors - the pacing strategies that drain a task queue
//!
//! Both strategies start at most one task per rate period, re-run nothing on
//! their own (repeating tasks are re-submitted by their result handler) and
//! go idle once the queue stays empty for a period.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::Pacing;
use crate::error::{ExecutorError, Result};
use crate::queue::TaskQueue;
use crate::task::TaskWrapper;

mod looping;
mod timer;

pub use looping::LoopExecutor;
pub use timer::TimerExecutor;

/// Paces dequeue-and-run cycles over a shared task queue
pub trait InternalExecutor: Send + Sync {
    /// Enqueue a wrapper and make sure the pacing loop is running
    fn submit(&self, task: Arc<TaskWrapper>);

    /// Go idle once the queue is empty
    fn request_stop(&self);

    /// Stop pacing; queued wrappers stay queued
    fn stop(&self);

    /// Interrupt the task executing right now, if the strategy can
    fn interrupt(&self) -> bool;

    fn is_running(&self) -> bool;

    fn pacing(&self) -> Pacing;
}

/// Build the internal executor for `pacing` over `queue`
pub fn build(
    pacing: Pacing,
    rate: Duration,
    thread_name: Option<&str>,
    queue: Arc<TaskQueue>,
) -> Result<Arc<dyn InternalExecutor>> {
    debug!(?rate, %pacing, ?thread_name, "executor::build: called");
    let rate = validate_rate(rate)?;

    let executor: Arc<dyn InternalExecutor> = match pacing {
        Pacing::Timer => Arc::new(TimerExecutor::new(queue, rate, thread_name)?),
        Pacing::Loop => Arc::new(LoopExecutor::new(queue, rate, thread_name)),
    };
    Ok(executor)
}

fn validate_rate(rate: Duration) -> Result<Duration> {
    if rate.is_zero() {
        return Err(ExecutorError::InvalidArgument("rate must be greater than zero".to_string()));
    }
    // Period starts are computed as Instants
    if Instant::now().checked_add(rate).is_none() {
        return Err(ExecutorError::InvalidArgument(format!("rate {rate:?} exceeds the clock's range")));
    }
    Ok(rate)
}
