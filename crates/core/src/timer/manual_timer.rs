use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::{Clock, DeferredTask, Deferrer, TimerHandle};

/// Virtual-time backend.
///
/// Nothing runs until [`advance`](ManualTimer::advance) is called. Tasks fire
/// in due-time order (ties in scheduling order) and the clock reads each
/// task's due time while it runs, unless a task has already pushed the clock
/// further with [`consume`](ManualTimer::consume), which models callback
/// latency.
#[derive(Clone, Default)]
pub struct ManualTimer {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    queue: BTreeMap<(Duration, u64), DeferredTask>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `by`, running every task that falls due.
    ///
    /// Returns how many tasks ran. Tasks scheduled while advancing run in the
    /// same call if they fall inside the window.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.inner.lock().now + by;
        let mut ran = 0;

        loop {
            let task = {
                let mut state = self.inner.lock();
                let next = state.queue.keys().next().copied();
                let key = match next {
                    Some(key) if key.0 <= target => key,
                    _ => {
                        state.now = state.now.max(target);
                        break;
                    }
                };
                state.now = state.now.max(key.0);
                state.queue.remove(&key)
            };

            if let Some(task) = task {
                task();
                ran += 1;
            }
        }

        ran
    }

    /// Move the clock forward without running anything, as if the current
    /// callback took `by` to execute.
    pub fn consume(&self, by: Duration) {
        self.inner.lock().now += by;
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Due time of the earliest waiting task.
    pub fn next_due(&self) -> Option<Duration> {
        self.inner.lock().queue.keys().next().map(|&(due, _)| due)
    }
}

impl Clock for ManualTimer {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }
}

impl Deferrer for ManualTimer {
    fn schedule_once(&self, delay: Duration, task: DeferredTask) -> TimerHandle {
        let key = {
            let mut state = self.inner.lock();
            let key = (state.now + delay, state.next_seq);
            state.next_seq += 1;
            state.queue.insert(key, task);
            key
        };

        let weak: Weak<Mutex<ManualState>> = Arc::downgrade(&self.inner);
        TimerHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().queue.remove(&key);
            }
        })
    }
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ManualTimer")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    type Log = Arc<Mutex<Vec<(u32, Duration)>>>;

    fn record(log: &Log, timer: &ManualTimer, id: u32) -> DeferredTask {
        let log = Arc::clone(log);
        let timer = timer.clone();
        Box::new(move || log.lock().push((id, timer.now())))
    }

    #[test]
    fn test_tasks_run_in_due_order() {
        let timer = ManualTimer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _a = timer.schedule_once(Duration::from_millis(30), record(&log, &timer, 1));
        let _b = timer.schedule_once(Duration::from_millis(10), record(&log, &timer, 2));
        let _c = timer.schedule_once(Duration::from_millis(10), record(&log, &timer, 3));

        assert_eq!(timer.pending(), 3);
        assert_eq!(timer.next_due(), Some(Duration::from_millis(10)));
        assert_eq!(timer.advance(Duration::from_millis(50)), 3);

        let log = log.lock();
        assert_eq!(
            *log,
            vec![
                (2, Duration::from_millis(10)),
                (3, Duration::from_millis(10)),
                (1, Duration::from_millis(30)),
            ]
        );
        assert_eq!(timer.now(), Duration::from_millis(50));
    }

    #[test]
    fn test_advance_stops_at_window_edge() {
        let timer = ManualTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let _handle = timer.schedule_once(
            Duration::from_millis(100),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(timer.advance(Duration::from_millis(99)), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.advance(Duration::from_millis(1)), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_removes_task() {
        let timer = ManualTimer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = timer.schedule_once(Duration::from_millis(5), record(&log, &timer, 1));
        handle.cancel();

        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.advance(Duration::from_millis(10)), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_task_scheduled_during_advance_runs_in_window() {
        let timer = ManualTimer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_timer = timer.clone();
        let inner_log = Arc::clone(&log);
        let _outer = timer.schedule_once(
            Duration::from_millis(10),
            Box::new(move || {
                let task = record(&inner_log, &inner_timer, 2);
                let _ = inner_timer.schedule_once(Duration::from_millis(10), task);
            }),
        );

        assert_eq!(timer.advance(Duration::from_millis(25)), 2);
        assert_eq!(*log.lock(), vec![(2, Duration::from_millis(20))]);
    }

    #[test]
    fn test_consume_makes_later_tasks_late() {
        let timer = ManualTimer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow_timer = timer.clone();
        let _slow = timer.schedule_once(
            Duration::from_millis(10),
            Box::new(move || slow_timer.consume(Duration::from_millis(15))),
        );
        let _next = timer.schedule_once(Duration::from_millis(20), record(&log, &timer, 1));

        timer.advance(Duration::from_millis(40));
        assert_eq!(*log.lock(), vec![(1, Duration::from_millis(25))]);
        assert_eq!(timer.now(), Duration::from_millis(40));
    }
}
