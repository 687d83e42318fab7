//! Clock and deferred-call capabilities the scheduler runs on.
//!
//! The scheduler never sleeps itself. It asks a [`TimerBackend`] for the
//! current monotonic time and for a one-shot callback some delay from now,
//! which keeps the timing logic independent of the executor. Two backends
//! ship with the crate: [`TokioTimer`] for real playback and [`ManualTimer`]
//! for virtual-time simulation and tests.

use std::fmt;
use std::time::Duration;

pub mod manual_timer;
pub mod tokio_timer;

pub use manual_timer::ManualTimer;
pub use tokio_timer::TokioTimer;

/// Work handed to a backend to run once its delay elapses.
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since the backend's origin. Never goes backwards.
    fn now(&self) -> Duration;
}

/// One-shot deferred execution.
pub trait Deferrer: Send + Sync {
    /// Run `task` once, `delay` from now. The returned handle cancels it.
    fn schedule_once(&self, delay: Duration, task: DeferredTask) -> TimerHandle;
}

/// Everything the interval scheduler needs from its environment.
pub trait TimerBackend: Clock + Deferrer {}

impl<T: Clock + Deferrer + ?Sized> TimerBackend for T {}

/// Cancellation handle for a task passed to [`Deferrer::schedule_once`].
///
/// Dropping the handle leaves the task scheduled; only [`cancel`](Self::cancel)
/// withdraws it.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_cancel_runs_cancel_action() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let handle = TimerHandle::new(move || flag.store(true, Ordering::SeqCst));

        assert!(!cancelled.load(Ordering::SeqCst));
        handle.cancel();
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_does_not_cancel() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        drop(TimerHandle::new(move || flag.store(true, Ordering::SeqCst)));

        assert!(!cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_detached_cancel_is_noop() {
        let handle = TimerHandle::detached();
        assert_eq!(format!("{:?}", handle), "TimerHandle { cancellable: false }");
        handle.cancel();
    }
}
