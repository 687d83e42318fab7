use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;

use super::{Clock, DeferredTask, Deferrer, TimerHandle};
use crate::error::{Result, TactusError};

/// Timer backend running deferred calls as tasks on a tokio runtime.
///
/// Each call to `schedule_once` spawns one task that sleeps and then runs the
/// callback on a runtime worker. Time is read from `tokio::time::Instant`, so
/// a runtime with paused time drives the scheduler deterministically.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    handle: Handle,
    origin: Instant,
}

impl TokioTimer {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            origin: Instant::now(),
        }
    }

    /// Backend bound to the runtime of the calling context.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| TactusError::Runtime(format!("no tokio runtime available: {}", e)))?;
        Ok(Self::new(handle))
    }
}

impl Clock for TokioTimer {
    fn now(&self) -> Duration {
        Instant::now().saturating_duration_since(self.origin)
    }
}

impl Deferrer for TokioTimer {
    fn schedule_once(&self, delay: Duration, task: DeferredTask) -> TimerHandle {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TimerHandle::new(move || join.abort())
    }
}
