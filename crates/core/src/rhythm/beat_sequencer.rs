//! Beat counting on top of the interval scheduler.
//!
//! The sequencer owns at most one [`IntervalScheduler`] at a time. Starting
//! creates it, stopping drops it, and any meter change while playing replaces
//! it with a fresh one built from the new interval.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::audio::{AudioTrigger, SoundKind};
use crate::error::Result;
use crate::rhythm::meter::{Denominator, Meter, MeterChange};
use crate::scheduler::{IntervalScheduler, Overrun, SchedulerOptions};
use crate::timer::TimerBackend;

/// Receives beat index changes, e.g. to drive a visual indicator.
pub trait BeatObserver: Send + Sync {
    /// Called after the beat's sound has been dispatched.
    fn on_beat_changed(&self, beat_index: u8, is_downbeat: bool);

    /// Called when playback starts or stops.
    fn on_playback_changed(&self, _is_playing: bool) {}
}

impl<F> BeatObserver for F
where
    F: Fn(u8, bool) + Send + Sync,
{
    fn on_beat_changed(&self, beat_index: u8, is_downbeat: bool) {
        self(beat_index, is_downbeat)
    }
}

pub type OverrunHandler = Arc<dyn Fn(Overrun) + Send + Sync>;

#[derive(Default)]
struct BeatState {
    current_beat: AtomicU8,
    playing: AtomicBool,
    /// Beats sounded since the last start, the start downbeat included.
    beats_played: AtomicU64,
}

#[derive(Default)]
struct Listeners {
    observer: RwLock<Option<Arc<dyn BeatObserver>>>,
    on_overrun: RwLock<Option<OverrunHandler>>,
}

impl Listeners {
    // Listeners are cloned out so they may re-register themselves.
    fn beat_changed(&self, beat_index: u8) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_beat_changed(beat_index, beat_index == 0);
        }
    }

    fn playback_changed(&self, is_playing: bool) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_playback_changed(is_playing);
        }
    }

    fn overrun(&self, overrun: Overrun) {
        let handler = self.on_overrun.read().clone();
        if let Some(handler) = handler {
            handler(overrun);
        }
    }
}

/// Metronome state machine: `Stopped` ⇄ `Playing`.
pub struct BeatSequencer {
    backend: Arc<dyn TimerBackend>,
    audio: Arc<dyn AudioTrigger>,
    meter: Meter,
    state: Arc<BeatState>,
    listeners: Arc<Listeners>,
    scheduler: Option<IntervalScheduler>,
}

impl BeatSequencer {
    pub fn new(backend: Arc<dyn TimerBackend>, audio: Arc<dyn AudioTrigger>) -> Self {
        Self::with_meter(backend, audio, Meter::default())
    }

    pub fn with_meter(
        backend: Arc<dyn TimerBackend>,
        audio: Arc<dyn AudioTrigger>,
        meter: Meter,
    ) -> Self {
        Self {
            backend,
            audio,
            meter,
            state: Arc::new(BeatState::default()),
            listeners: Arc::new(Listeners::default()),
            scheduler: None,
        }
    }

    /// Register the beat observer, replacing any previous one.
    pub fn on_beat_changed<O>(&self, observer: O)
    where
        O: BeatObserver + 'static,
    {
        *self.listeners.observer.write() = Some(Arc::new(observer));
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn BeatObserver>>) {
        *self.listeners.observer.write() = observer;
    }

    /// Register a handler for advisory scheduling overruns.
    pub fn on_overrun<F>(&self, handler: F)
    where
        F: Fn(Overrun) + Send + Sync + 'static,
    {
        *self.listeners.on_overrun.write() = Some(Arc::new(handler));
    }

    /// Validate and apply a new meter. Restarts playback if it is running.
    pub fn configure(&mut self, numerator: u8, denominator: u8, tempo_bpm: u16) -> Result<()> {
        let meter = Meter::from_raw(numerator, denominator, tempo_bpm)?;
        self.set_meter(meter)
    }

    /// Apply a partial meter change. Restarts playback if it is running.
    pub fn apply(&mut self, change: MeterChange) -> Result<()> {
        let meter = self.meter.apply(change)?;
        self.set_meter(meter)
    }

    pub fn set_tempo(&mut self, tempo_bpm: u16) -> Result<()> {
        self.apply(MeterChange::tempo(tempo_bpm))
    }

    pub fn set_numerator(&mut self, numerator: u8) -> Result<()> {
        self.apply(MeterChange::numerator(numerator))
    }

    pub fn set_denominator(&mut self, denominator: Denominator) -> Result<()> {
        self.apply(MeterChange::denominator(denominator.value()))
    }

    pub fn set_meter(&mut self, meter: Meter) -> Result<()> {
        if meter == self.meter {
            return Ok(());
        }

        log::info!("Meter changed: {} -> {}", self.meter, meter);
        self.meter = meter;

        if self.is_playing() {
            self.restart()?;
        }
        Ok(())
    }

    /// Start playback. The downbeat sounds before this returns.
    pub fn start(&mut self) -> Result<()> {
        if self.is_playing() {
            return Ok(());
        }

        let scheduler = self.build_scheduler()?;
        self.state.playing.store(true, Ordering::SeqCst);

        log::info!(
            "Playback started: {} ({} ms per beat)",
            self.meter,
            self.meter.interval_ms()
        );
        self.listeners.playback_changed(true);
        self.launch(scheduler);
        Ok(())
    }

    // Playback stays on across a restart, so observers only hear the new
    // downbeat.
    fn restart(&mut self) -> Result<()> {
        let scheduler = self.build_scheduler()?;
        self.halt();

        log::info!(
            "Playback restarted: {} ({} ms per beat)",
            self.meter,
            self.meter.interval_ms()
        );
        self.launch(scheduler);
        Ok(())
    }

    fn build_scheduler(&self) -> Result<IntervalScheduler> {
        IntervalScheduler::new(
            Arc::clone(&self.backend),
            self.meter.interval_ms(),
            self.scheduler_options(),
            self.tick_handler(),
        )
    }

    fn launch(&mut self, scheduler: IntervalScheduler) {
        self.state.current_beat.store(0, Ordering::SeqCst);
        self.state.beats_played.store(1, Ordering::SeqCst);

        self.audio.play_sound(SoundKind::Downbeat);
        self.listeners.beat_changed(0);

        scheduler.start();
        self.scheduler = Some(scheduler);
    }

    /// Cancel and drop the running scheduler, if any.
    fn halt(&mut self) -> bool {
        let Some(scheduler) = self.scheduler.take() else {
            return false;
        };
        scheduler.stop();
        drop(scheduler);
        self.state.current_beat.store(0, Ordering::SeqCst);
        true
    }

    /// Stop playback and reset the beat counter. No beat fires after this
    /// returns.
    pub fn stop(&mut self) {
        if !self.halt() {
            return;
        }

        self.state.playing.store(false, Ordering::SeqCst);
        log::info!(
            "Playback stopped after {} beats",
            self.state.beats_played.load(Ordering::SeqCst)
        );
        self.listeners.beat_changed(0);
        self.listeners.playback_changed(false);
    }

    pub fn toggle(&mut self) -> Result<bool> {
        if self.is_playing() {
            self.stop();
        } else {
            self.start()?;
        }
        Ok(self.is_playing())
    }

    pub fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::SeqCst)
    }

    pub fn current_beat(&self) -> u8 {
        self.state.current_beat.load(Ordering::SeqCst)
    }

    pub fn beats_played(&self) -> u64 {
        self.state.beats_played.load(Ordering::SeqCst)
    }

    pub fn meter(&self) -> Meter {
        self.meter
    }

    pub fn interval_ms(&self) -> u64 {
        self.meter.interval_ms()
    }

    fn scheduler_options(&self) -> SchedulerOptions {
        let listeners = Arc::clone(&self.listeners);
        SchedulerOptions {
            // The start downbeat is sounded explicitly.
            run_immediately: false,
            on_overrun: Some(Box::new(move |overrun| listeners.overrun(overrun))),
        }
    }

    fn tick_handler(&self) -> impl FnMut() + Send + 'static {
        let numerator = self.meter.numerator();
        let state = Arc::clone(&self.state);
        let listeners = Arc::clone(&self.listeners);
        let audio = Arc::clone(&self.audio);

        move || {
            let current = state.current_beat.load(Ordering::SeqCst);
            // Anything out of range for this numerator restarts the measure.
            let next = if current.saturating_add(1) >= numerator {
                0
            } else {
                current + 1
            };

            audio.play_sound(SoundKind::for_beat(next));
            state.current_beat.store(next, Ordering::SeqCst);
            state.beats_played.fetch_add(1, Ordering::SeqCst);
            log::debug!("Beat {}/{}", next + 1, numerator);
            listeners.beat_changed(next);
        }
    }
}

impl Drop for BeatSequencer {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
    }
}

impl std::fmt::Debug for BeatSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeatSequencer")
            .field("meter", &self.meter)
            .field("playing", &self.is_playing())
            .field("current_beat", &self.current_beat())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::timer::{Clock, ManualTimer};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Sound(SoundKind, Duration),
        Beat(u8, bool),
    }

    struct Recorder {
        clock: ManualTimer,
        events: Mutex<Vec<Event>>,
    }

    impl AudioTrigger for Recorder {
        fn play_sound(&self, kind: SoundKind) {
            self.events.lock().push(Event::Sound(kind, self.clock.now()));
        }
    }

    fn setup() -> (ManualTimer, Arc<Recorder>, BeatSequencer) {
        let timer = ManualTimer::new();
        let recorder = Arc::new(Recorder {
            clock: timer.clone(),
            events: Mutex::new(Vec::new()),
        });
        let sequencer = BeatSequencer::new(Arc::new(timer.clone()), recorder.clone());

        let observer = Arc::clone(&recorder);
        sequencer.on_beat_changed(move |beat: u8, downbeat: bool| {
            observer.events.lock().push(Event::Beat(beat, downbeat));
        });
        (timer, recorder, sequencer)
    }

    fn sounds(recorder: &Recorder) -> Vec<(SoundKind, Duration)> {
        recorder
            .events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Sound(kind, at) => Some((*kind, *at)),
                Event::Beat(..) => None,
            })
            .collect()
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_start_sounds_downbeat_synchronously() {
        let (timer, recorder, mut sequencer) = setup();

        sequencer.start().unwrap();

        assert!(sequencer.is_playing());
        assert_eq!(sequencer.current_beat(), 0);
        assert_eq!(
            *recorder.events.lock(),
            vec![Event::Sound(SoundKind::Downbeat, ms(0)), Event::Beat(0, true)]
        );
        assert_eq!(timer.next_due(), Some(ms(500)));
    }

    #[test]
    fn test_beats_cycle_through_measure() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.configure(3, 4, 120).unwrap();
        sequencer.start().unwrap();

        let mut seen = vec![sequencer.current_beat()];
        for _ in 0..7 {
            timer.advance(ms(500));
            seen.push(sequencer.current_beat());
        }

        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0, 1]);
        let kinds: Vec<SoundKind> = sounds(&recorder).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![
                SoundKind::Downbeat,
                SoundKind::RegularBeat,
                SoundKind::RegularBeat,
                SoundKind::Downbeat,
                SoundKind::RegularBeat,
                SoundKind::RegularBeat,
                SoundKind::Downbeat,
                SoundKind::RegularBeat,
            ]
        );
        assert_eq!(sequencer.beats_played(), 8);
    }

    #[test]
    fn test_single_beat_measure_is_all_downbeats() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.configure(1, 4, 60).unwrap();
        sequencer.start().unwrap();
        timer.advance(ms(3000));

        assert_eq!(sequencer.current_beat(), 0);
        assert!(sounds(&recorder)
            .iter()
            .all(|(kind, _)| *kind == SoundKind::Downbeat));
        assert_eq!(sounds(&recorder).len(), 4);
    }

    #[test]
    fn test_sound_precedes_observer_notification() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.start().unwrap();
        timer.advance(ms(1000));

        let events = recorder.events.lock();
        assert_eq!(
            *events,
            vec![
                Event::Sound(SoundKind::Downbeat, ms(0)),
                Event::Beat(0, true),
                Event::Sound(SoundKind::RegularBeat, ms(500)),
                Event::Beat(1, false),
                Event::Sound(SoundKind::RegularBeat, ms(1000)),
                Event::Beat(2, false),
            ]
        );
    }

    #[test]
    fn test_stop_resets_and_silences() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.start().unwrap();
        timer.advance(ms(1000));
        assert_eq!(sequencer.current_beat(), 2);

        sequencer.stop();
        assert!(!sequencer.is_playing());
        assert_eq!(sequencer.current_beat(), 0);
        assert_eq!(recorder.events.lock().last(), Some(&Event::Beat(0, true)));
        assert_eq!(timer.pending(), 0);

        let before = sounds(&recorder).len();
        timer.advance(ms(5000));
        assert_eq!(sounds(&recorder).len(), before);

        // Stopping again changes nothing.
        let events_before = recorder.events.lock().len();
        sequencer.stop();
        assert_eq!(recorder.events.lock().len(), events_before);
    }

    #[test]
    fn test_tempo_change_while_playing_restarts() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.start().unwrap();
        timer.advance(ms(1200));
        assert_eq!(sequencer.current_beat(), 2);

        sequencer.set_tempo(60).unwrap();
        assert!(sequencer.is_playing());
        assert_eq!(sequencer.current_beat(), 0);
        assert_eq!(sequencer.interval_ms(), 1000);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_due(), Some(ms(2200)));

        timer.advance(ms(1000));
        let tail: Vec<(SoundKind, Duration)> = sounds(&recorder).into_iter().skip(3).collect();
        assert_eq!(
            tail,
            vec![
                (SoundKind::Downbeat, ms(1200)),
                (SoundKind::RegularBeat, ms(2200)),
            ]
        );
    }

    #[test]
    fn test_numerator_shrink_while_playing_stays_in_range() {
        let (timer, _recorder, mut sequencer) = setup();
        sequencer.configure(7, 8, 120).unwrap();
        sequencer.start().unwrap();
        timer.advance(ms(250 * 6));
        assert_eq!(sequencer.current_beat(), 6);

        sequencer.set_numerator(2).unwrap();
        assert_eq!(sequencer.current_beat(), 0);
        for _ in 0..5 {
            timer.advance(ms(250));
            assert!(sequencer.current_beat() < 2);
        }
    }

    #[test]
    fn test_restart_sounds_downbeat_before_notifying_once() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.start().unwrap();
        timer.advance(ms(1300));
        recorder.events.lock().clear();

        sequencer.set_denominator(Denominator::Eighth).unwrap();
        assert_eq!(
            *recorder.events.lock(),
            vec![Event::Sound(SoundKind::Downbeat, ms(1300)), Event::Beat(0, true)]
        );

        timer.advance(ms(260));
        recorder.events.lock().clear();
        sequencer.configure(3, 16, 60).unwrap();
        assert_eq!(
            *recorder.events.lock(),
            vec![Event::Sound(SoundKind::Downbeat, ms(1560)), Event::Beat(0, true)]
        );
    }

    #[test]
    fn test_denominator_change_while_playing_restarts() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.start().unwrap();
        timer.advance(ms(1200));
        assert_eq!(sequencer.current_beat(), 2);

        sequencer.set_denominator(Denominator::Eighth).unwrap();
        assert!(sequencer.is_playing());
        assert_eq!(sequencer.current_beat(), 0);
        assert_eq!(sequencer.interval_ms(), 250);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_due(), Some(ms(1450)));

        timer.advance(ms(250));
        assert_eq!(sequencer.current_beat(), 1);
        let tail: Vec<(SoundKind, Duration)> = sounds(&recorder).into_iter().skip(3).collect();
        assert_eq!(
            tail,
            vec![
                (SoundKind::Downbeat, ms(1200)),
                (SoundKind::RegularBeat, ms(1450)),
            ]
        );
    }

    #[test]
    fn test_configure_while_playing_restarts() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.start().unwrap();
        timer.advance(ms(700));
        assert_eq!(sequencer.current_beat(), 1);

        sequencer.configure(3, 8, 120).unwrap();
        assert!(sequencer.is_playing());
        assert_eq!(sequencer.current_beat(), 0);
        assert_eq!(sequencer.meter().to_string(), "3/8 @ 120 BPM");
        assert_eq!(sequencer.interval_ms(), 250);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_due(), Some(ms(950)));

        timer.advance(ms(750));
        let tail: Vec<(SoundKind, Duration)> = sounds(&recorder).into_iter().skip(2).collect();
        assert_eq!(
            tail,
            vec![
                (SoundKind::Downbeat, ms(700)),
                (SoundKind::RegularBeat, ms(950)),
                (SoundKind::RegularBeat, ms(1200)),
                (SoundKind::Downbeat, ms(1450)),
            ]
        );
    }

    #[test]
    fn test_configure_while_stopped_does_not_start() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.configure(5, 8, 100).unwrap();

        assert!(!sequencer.is_playing());
        assert_eq!(sequencer.meter().to_string(), "5/8 @ 100 BPM");
        assert_eq!(sequencer.interval_ms(), 300);
        assert_eq!(timer.pending(), 0);
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_invalid_configuration_keeps_previous_meter() {
        let (_timer, _recorder, mut sequencer) = setup();

        assert!(sequencer.configure(0, 4, 120).is_err());
        assert!(sequencer.configure(4, 5, 120).is_err());
        assert!(sequencer.configure(4, 4, 500).is_err());
        assert!(sequencer.set_tempo(39).is_err());
        assert_eq!(sequencer.meter(), Meter::default());
    }

    #[test]
    fn test_same_meter_does_not_restart() {
        let (timer, recorder, mut sequencer) = setup();
        sequencer.start().unwrap();
        timer.advance(ms(500));

        sequencer.configure(4, 4, 120).unwrap();
        assert_eq!(sequencer.current_beat(), 1);
        assert_eq!(sounds(&recorder).len(), 2);
    }

    #[test]
    fn test_toggle() {
        let (_timer, _recorder, mut sequencer) = setup();
        assert!(sequencer.toggle().unwrap());
        assert!(!sequencer.toggle().unwrap());
    }

    #[test]
    fn test_playback_changes_are_observed() {
        struct Watcher(Mutex<Vec<bool>>);

        impl BeatObserver for Watcher {
            fn on_beat_changed(&self, _beat_index: u8, _is_downbeat: bool) {}

            fn on_playback_changed(&self, is_playing: bool) {
                self.0.lock().push(is_playing);
            }
        }

        let timer = ManualTimer::new();
        let watcher = Arc::new(Watcher(Mutex::new(Vec::new())));
        let mut sequencer =
            BeatSequencer::new(Arc::new(timer.clone()), Arc::new(crate::audio::SilentTrigger));
        sequencer.set_observer(Some(watcher.clone()));

        sequencer.start().unwrap();
        sequencer.set_tempo(90).unwrap();
        sequencer.stop();

        assert_eq!(*watcher.0.lock(), vec![true, false]);
    }

    #[test]
    fn test_overrun_handler_receives_late_rounds() {
        let (timer, _recorder, mut sequencer) = setup();
        let overruns = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&overruns);
        sequencer.on_overrun(move |overrun| sink.lock().push(overrun.drift));

        sequencer.start().unwrap();
        timer.consume(ms(1100));
        timer.advance(ms(0));

        assert_eq!(overruns.lock().first(), Some(&ms(600)));
        assert!(sequencer.is_playing());
    }
}
