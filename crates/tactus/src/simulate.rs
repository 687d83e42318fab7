//! Offline run against a virtual clock.
//!
//! Every timer wakeup is delivered late by a random amount, the way a busy
//! executor would deliver it. The report shows where each beat landed next to
//! its ideal time and how far a plain re-arming timer would have slipped.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tactus_core::timer::DeferredTask;
use tactus_core::{
    AudioTrigger, BeatSequencer, Clock, Deferrer, ManualTimer, Meter, SoundKind, TimerHandle,
};

/// Virtual-time backend whose wakeups arrive up to `max_jitter` late.
struct JitteryTimer {
    inner: ManualTimer,
    max_jitter_ms: u64,
    rng: Mutex<StdRng>,
    /// Every lateness injected so far.
    injected: Mutex<Vec<Duration>>,
}

impl Clock for JitteryTimer {
    fn now(&self) -> Duration {
        self.inner.now()
    }
}

impl Deferrer for JitteryTimer {
    fn schedule_once(&self, delay: Duration, task: DeferredTask) -> TimerHandle {
        let late = Duration::from_millis(self.rng.lock().random_range(0..=self.max_jitter_ms));
        self.injected.lock().push(late);
        self.inner.schedule_once(delay + late, task)
    }
}

struct Timeline {
    clock: ManualTimer,
    sounds: Mutex<Vec<(SoundKind, Duration)>>,
}

impl AudioTrigger for Timeline {
    fn play_sound(&self, kind: SoundKind) {
        self.sounds.lock().push((kind, self.clock.now()));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimulationOptions {
    pub beats: u64,
    pub max_jitter_ms: u64,
    pub seed: u64,
}

/// Result of one simulated run.
#[derive(Debug)]
pub struct SimulationReport {
    pub meter: Meter,
    /// Each beat's sound and when it fired.
    pub beats: Vec<(SoundKind, Duration)>,
    /// Lateness of a timer that re-arms by a full interval after each beat.
    pub uncompensated_drift: Duration,
}

impl SimulationReport {
    /// How late beat `index` fired relative to `index * interval`.
    pub fn offset(&self, index: usize) -> Duration {
        let ideal = self.meter.interval() * index as u32;
        self.beats[index].1.saturating_sub(ideal)
    }

    pub fn max_offset(&self) -> Duration {
        (0..self.beats.len())
            .map(|index| self.offset(index))
            .max()
            .unwrap_or_default()
    }

    pub fn print(&self) {
        println!(
            "Simulated {} beats of {} ({} ms per beat)",
            self.beats.len(),
            self.meter,
            self.meter.interval_ms()
        );
        println!("{:>5}  {:<8}  {:>10}  {:>10}  {:>6}", "beat", "sound", "fired", "ideal", "late");
        for (index, (kind, at)) in self.beats.iter().enumerate() {
            let ideal = self.meter.interval() * index as u32;
            let sound = match kind {
                SoundKind::Downbeat => "accent",
                SoundKind::RegularBeat => "click",
            };
            println!(
                "{:>5}  {:<8}  {:>8} ms  {:>8} ms  {:>3} ms",
                index + 1,
                sound,
                at.as_millis(),
                ideal.as_millis(),
                self.offset(index).as_millis()
            );
        }

        let last = self.beats.len().saturating_sub(1);
        println!();
        println!(
            "Compensated: worst beat {} ms late, last beat {} ms late",
            self.max_offset().as_millis(),
            if self.beats.is_empty() {
                0
            } else {
                self.offset(last).as_millis()
            }
        );
        println!(
            "A timer re-armed by a full interval would have slipped {} ms",
            self.uncompensated_drift.as_millis()
        );
    }
}

pub fn run(meter: Meter, options: SimulationOptions) -> Result<SimulationReport, anyhow::Error> {
    if options.max_jitter_ms >= meter.interval_ms() {
        anyhow::bail!(
            "jitter of {} ms is not below the {} ms beat interval",
            options.max_jitter_ms,
            meter.interval_ms()
        );
    }

    let clock = ManualTimer::new();
    let backend = Arc::new(JitteryTimer {
        inner: clock.clone(),
        max_jitter_ms: options.max_jitter_ms,
        rng: Mutex::new(StdRng::seed_from_u64(options.seed)),
        injected: Mutex::new(Vec::new()),
    });
    let timeline = Arc::new(Timeline {
        clock: clock.clone(),
        sounds: Mutex::new(Vec::new()),
    });

    let mut sequencer = BeatSequencer::with_meter(backend.clone(), timeline.clone(), meter);
    sequencer.start()?;
    while (timeline.sounds.lock().len() as u64) < options.beats {
        clock.advance(meter.interval());
    }
    sequencer.stop();

    let mut beats = std::mem::take(&mut *timeline.sounds.lock());
    beats.truncate(options.beats as usize);

    // Beat k was armed by the k-th wakeup request.
    let uncompensated_drift = backend
        .injected
        .lock()
        .iter()
        .take(beats.len().saturating_sub(1))
        .sum();

    Ok(SimulationReport {
        meter,
        beats,
        uncompensated_drift,
    })
}
