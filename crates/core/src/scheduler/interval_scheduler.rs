//! Drift-compensating repeating timer.
//!
//! Every round measures how late it fired against the ideal deadline and
//! shortens the next wait by that amount. Deadlines advance by exactly one
//! interval per round, so callback latency and executor jitter never
//! accumulate: the n-th tick stays within one round's latency of
//! `start + n * interval`, however long the run.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};

use crate::error::{Result, TactusError};
use crate::timer::{TimerBackend, TimerHandle};

pub type TickCallback = Box<dyn FnMut() + Send + 'static>;
pub type OverrunCallback = Box<dyn FnMut(Overrun) + Send + 'static>;

/// A round that fired more than one full interval after its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overrun {
    /// How late the round fired.
    pub drift: Duration,
    pub interval: Duration,
}

#[derive(Default)]
pub struct SchedulerOptions {
    /// Invoke the tick callback synchronously inside `start()`.
    pub run_immediately: bool,
    /// Advisory hook for rounds that fire over an interval late.
    pub on_overrun: Option<OverrunCallback>,
}

impl fmt::Debug for SchedulerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerOptions")
            .field("run_immediately", &self.run_immediately)
            .field("on_overrun", &self.on_overrun.is_some())
            .finish()
    }
}

/// Lifecycle of a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    /// Created, never started.
    Idle = 0,
    /// Started; exactly one deferred round is pending or running.
    Armed = 1,
    Stopped = 2,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Armed,
            _ => SchedulerState::Stopped,
        }
    }
}

struct Timing {
    expected_deadline: Duration,
    pending: Option<TimerHandle>,
}

struct Callbacks {
    on_tick: Mutex<TickCallback>,
    on_overrun: Mutex<Option<OverrunCallback>>,
}

struct Shared {
    backend: Arc<dyn TimerBackend>,
    interval: Duration,
    run_immediately: bool,
    state: AtomicU8,
    /// Bumped on every start so rounds armed by an earlier run retire.
    epoch: AtomicU64,
    ticks: AtomicU64,
    /// Held for the whole of every round and every start/stop. Reentrant so
    /// the tick callback may call `stop()` on its own thread.
    gate: ReentrantMutex<()>,
    /// Never held across a callback.
    timing: Mutex<Timing>,
    callbacks: Callbacks,
}

impl Shared {
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.state() == SchedulerState::Armed && self.epoch.load(Ordering::Acquire) == epoch
    }

    fn invoke_tick(&self) {
        match self.callbacks.on_tick.try_lock() {
            Some(mut on_tick) => {
                self.ticks.fetch_add(1, Ordering::Relaxed);
                (on_tick)();
            }
            None => log::warn!("Skipping nested tick: callback is already running"),
        }
    }

    fn invoke_overrun(&self, overrun: Overrun) {
        log::warn!(
            "Scheduler overrun: fired {:?} late for a {:?} interval",
            overrun.drift,
            overrun.interval
        );
        if let Some(mut on_overrun) = self.callbacks.on_overrun.try_lock() {
            if let Some(on_overrun) = on_overrun.as_mut() {
                on_overrun(overrun);
            }
        }
    }

    fn arm(self: &Arc<Self>, delay: Duration, epoch: u64) {
        let weak: Weak<Shared> = Arc::downgrade(self);
        let handle = self.backend.schedule_once(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.round(epoch);
                }
            }),
        );
        self.timing.lock().pending = Some(handle);
    }

    fn round(self: &Arc<Self>, epoch: u64) {
        let _gate = self.gate.lock();
        if !self.is_live(epoch) {
            return;
        }

        let now = self.backend.now();
        let expected = self.timing.lock().expected_deadline;
        let late = now.saturating_sub(expected);
        let early = expected.saturating_sub(now);

        if late > self.interval {
            self.invoke_overrun(Overrun {
                drift: late,
                interval: self.interval,
            });
            if !self.is_live(epoch) {
                return;
            }
        }

        self.invoke_tick();
        if !self.is_live(epoch) {
            return;
        }

        self.timing.lock().expected_deadline = expected + self.interval;

        // Pull the next firing back toward the ideal cadence.
        let delay = if late > Duration::ZERO {
            self.interval.saturating_sub(late)
        } else {
            self.interval + early
        };
        log::trace!("Round done: drift +{:?}/-{:?}, next in {:?}", late, early, delay);
        self.arm(delay, epoch);
    }
}

/// A restartable, cancellable repeating timer that compensates for drift.
///
/// `stop()` may be called from any thread, including from inside the tick
/// callback. Once it returns, no tick runs and nothing stays scheduled. A
/// tick callback must not block on another thread that is itself calling
/// `stop()` on the same scheduler.
pub struct IntervalScheduler {
    shared: Arc<Shared>,
}

impl IntervalScheduler {
    pub fn new<F>(
        backend: Arc<dyn TimerBackend>,
        interval_ms: u64,
        options: SchedulerOptions,
        on_tick: F,
    ) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if interval_ms == 0 {
            return Err(TactusError::invalid("scheduler interval must be positive"));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                interval: Duration::from_millis(interval_ms),
                run_immediately: options.run_immediately,
                state: AtomicU8::new(SchedulerState::Idle as u8),
                epoch: AtomicU64::new(0),
                ticks: AtomicU64::new(0),
                gate: ReentrantMutex::new(()),
                timing: Mutex::new(Timing {
                    expected_deadline: Duration::ZERO,
                    pending: None,
                }),
                callbacks: Callbacks {
                    on_tick: Mutex::new(Box::new(on_tick)),
                    on_overrun: Mutex::new(options.on_overrun),
                },
            }),
        })
    }

    /// Arm the timer. Starting an already running scheduler does nothing.
    pub fn start(&self) {
        let shared = &self.shared;
        let _gate = shared.gate.lock();

        if shared.state.swap(SchedulerState::Armed as u8, Ordering::AcqRel)
            == SchedulerState::Armed as u8
        {
            log::debug!("Scheduler already running");
            return;
        }

        let epoch = shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let now = shared.backend.now();
        let stale = {
            let mut timing = shared.timing.lock();
            timing.expected_deadline = now + shared.interval;
            timing.pending.take()
        };
        if let Some(stale) = stale {
            stale.cancel();
        }
        log::debug!("Scheduler started with {:?} interval", shared.interval);

        if shared.run_immediately {
            shared.invoke_tick();
            if !shared.is_live(epoch) {
                return;
            }
        }

        shared.arm(shared.interval, epoch);
    }

    /// Stop ticking. Idempotent; safe from inside the tick callback.
    pub fn stop(&self) {
        let shared = &self.shared;
        let previous = shared
            .state
            .swap(SchedulerState::Stopped as u8, Ordering::AcqRel);

        // Waits out a round in flight on another thread. The store repeats
        // the transition in case a concurrent start() slipped in meanwhile.
        let _gate = shared.gate.lock();
        shared
            .state
            .store(SchedulerState::Stopped as u8, Ordering::Release);

        let pending = shared.timing.lock().pending.take();
        if let Some(pending) = pending {
            pending.cancel();
        }

        if SchedulerState::from_u8(previous) == SchedulerState::Armed {
            log::debug!(
                "Scheduler stopped after {} ticks",
                shared.ticks.load(Ordering::Relaxed)
            );
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Armed
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Tick callbacks invoked over the scheduler's lifetime.
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for IntervalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalScheduler")
            .field("interval", &self.shared.interval)
            .field("state", &self.shared.state())
            .field("ticks", &self.tick_count())
            .finish()
    }
}
