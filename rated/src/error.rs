//! Error types for rated executors

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error accepted from task bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Errors surfaced through futures and executor construction
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Task was cancelled")]
    Cancelled,

    #[error("Task failed: {0}")]
    Execution(#[source] TaskFailure),

    #[error("Timed out after {0:?} waiting for task result")]
    Timeout(Duration),

    #[error("Execution index {index} out of range for {expected} expected executions")]
    IndexOutOfBounds { index: usize, expected: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to start executor runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl ExecutorError {
    /// Check if this is a cancellation error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutorError::Cancelled)
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutorError::Timeout(_))
    }

    /// Get the task failure if the task itself failed
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            ExecutorError::Execution(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Failure raised by a task body
///
/// Cheap to clone so that every call to `get` on a future can report the same
/// failure. The original error is preserved and can be recovered with
/// [`TaskFailure::downcast_ref`].
#[derive(Clone)]
pub struct TaskFailure(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl TaskFailure {
    /// Wrap an error raised by a task
    pub fn new(err: impl Into<BoxError>) -> Self {
        let boxed: BoxError = err.into();
        Self(Arc::from(boxed))
    }

    /// Build a failure from a panic payload caught while running a task
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(TaskPanicked { message })
    }

    /// The original error
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }

    /// Attempt to view the original error as a concrete type
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Check if the task panicked rather than returning an error
    pub fn is_panic(&self) -> bool {
        self.downcast_ref::<TaskPanicked>().is_some()
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskFailure").field(&self.0).finish()
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// A task panicked while executing
#[derive(Debug, Clone, Error)]
#[error("Task panicked: {message}")]
pub struct TaskPanicked {
    pub message: String,
}

/// A task observed an interrupt request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Task was interrupted")]
pub struct Interrupted;
