//! Cooperative interruption for tasks on a loop-paced executor
//!
//! A loop-paced worker thread registers an [`InterruptSignal`] for itself
//! before running any task. Cancelling the in-flight task with
//! `may_interrupt` raises that signal and unparks the worker. A task observes
//! the request through the functions in this module:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! fn poll_device() -> Result<u32, rated::Interrupted> {
//!     for _ in 0..10 {
//!         rated::interrupt::check()?;
//!         rated::interrupt::sleep(Duration::from_millis(50))?;
//!     }
//!     Ok(42)
//! }
//! ```
//!
//! Interruption is best effort. Outside a loop-paced worker these functions
//! never report an interrupt and [`sleep`] is a plain thread sleep.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::{Parker, Unparker};

use crate::error::Interrupted;

/// Interrupt flag for one worker thread
pub(crate) struct InterruptSignal {
    raised: AtomicBool,
    unparker: Unparker,
}

impl InterruptSignal {
    /// Raise the flag and wake the worker if it is parked
    pub(crate) fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.unparker.unpark();
    }

    /// Wake the worker without raising the flag
    pub(crate) fn wake(&self) {
        self.unparker.unpark();
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was raised
    pub(crate) fn clear(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }
}

struct WorkerContext {
    parker: Parker,
    signal: Arc<InterruptSignal>,
}

thread_local! {
    static WORKER: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Register the calling thread as an interruptible worker
///
/// Returns the signal other threads use to interrupt it.
pub(crate) fn register() -> Arc<InterruptSignal> {
    let parker = Parker::new();
    let signal = Arc::new(InterruptSignal {
        raised: AtomicBool::new(false),
        unparker: parker.unparker().clone(),
    });
    let handle = signal.clone();
    WORKER.with(|w| *w.borrow_mut() = Some(WorkerContext { parker, signal }));
    handle
}

pub(crate) fn unregister() {
    WORKER.with(|w| *w.borrow_mut() = None);
}

/// Park the worker until `deadline` or until woken
///
/// Returns early on any unpark; callers loop until their own condition holds.
pub(crate) fn park_until(deadline: Instant) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return;
    }
    WORKER.with(|w| match w.borrow().as_ref() {
        Some(ctx) => ctx.parker.park_timeout(remaining),
        None => std::thread::sleep(remaining),
    });
}

/// Consume a pending unpark token so it cannot cut the next sleep short
pub(crate) fn drain_wakeup() {
    WORKER.with(|w| {
        if let Some(ctx) = w.borrow().as_ref() {
            ctx.parker.park_timeout(Duration::ZERO);
        }
    });
}

fn with_signal<T>(f: impl FnOnce(&InterruptSignal) -> T) -> Option<T> {
    WORKER.with(|w| w.borrow().as_ref().map(|ctx| f(&ctx.signal)))
}

/// Whether the running task has been asked to stop
pub fn is_interrupted() -> bool {
    with_signal(InterruptSignal::is_raised).unwrap_or(false)
}

/// Test and clear the interrupt flag
pub fn interrupted() -> bool {
    with_signal(InterruptSignal::clear).unwrap_or(false)
}

/// Fail with [`Interrupted`] if the running task has been asked to stop
pub fn check() -> Result<(), Interrupted> {
    if is_interrupted() { Err(Interrupted) } else { Ok(()) }
}

/// Sleep for `duration`, waking early with [`Interrupted`] if the task is interrupted
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now().checked_add(duration);
    let interrupted = WORKER.with(|w| {
        let borrowed = w.borrow();
        let Some(ctx) = borrowed.as_ref() else {
            std::thread::sleep(duration);
            return false;
        };
        loop {
            if ctx.signal.is_raised() {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    ctx.parker.park_timeout(deadline - now);
                }
                None => ctx.parker.park(),
            }
        }
    });
    if interrupted { Err(Interrupted) } else { Ok(()) }
}
