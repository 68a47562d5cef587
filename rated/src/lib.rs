//! Rated - rate-limited task execution
//!
//! A [`RatedExecutor`] accepts units of work and starts them one at a time, no
//! more often than once per configured rate period. Every submission returns a
//! future that can be waited on, polled for completion or cancelled.
//!
//! # Core Concepts
//!
//! - **Rate period**: minimum spacing between successive task starts
//! - **FIFO**: tasks start in submission order; repeating tasks re-enter the queue at the tail
//! - **Pacing**: a timer-driven strategy, or a dedicated worker loop that can interrupt its running task
//! - **Cooperative interruption**: tasks poll [`interrupt`] to notice cancellation
//!
//! # Modules
//!
//! - [`rated`] - The public executor facade
//! - [`future`] - Future handles and their shared state machine
//! - [`executor`] - Timer-paced and loop-paced internal executors
//! - [`queue`] - Task queue tracking the executing task
//! - [`task`] - Task wrapper and result handler trait
//! - [`interrupt`] - Cooperative interruption for running tasks
//! - [`config`] - Configuration types and loading

pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod interrupt;
pub mod queue;
pub mod rated;
pub mod task;

// Re-export commonly used types
pub use config::{Pacing, RatedConfig};
pub use error::{BoxError, ExecutorError, Interrupted, Result, TaskFailure, TaskPanicked};
pub use executor::{InternalExecutor, LoopExecutor, TimerExecutor};
pub use future::{Expected, RepeatingFuture, TaskCanceller, TaskFuture};
pub use queue::{TaskQueue, Withdrawal};
pub use rated::RatedExecutor;
pub use task::{ResultHandler, TaskWrapper};
