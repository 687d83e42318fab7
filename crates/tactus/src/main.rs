use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tactus_core::{
    AudioTrigger, ClickPlayer, ClickSound, ConfigError, ConfigManager, MetronomeCommand,
    MetronomeConsole, MetronomeEvent, Settings, SilentTrigger,
};
use tokio::sync::mpsc;

mod input;
mod simulate;

/// Drift-compensating metronome for practice and live performance.
#[derive(Parser, Debug)]
#[command(name = "tactus")]
#[command(about = "Tactus metronome")]
struct Args {
    /// Settings file (default: <config dir>/tactus/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tempo in beats per minute (40-240)
    #[arg(short, long)]
    tempo: Option<u16>,

    /// Beats per measure (1-15)
    #[arg(short, long)]
    numerator: Option<u8>,

    /// Note value that gets the beat (2, 4, 8 or 16)
    #[arg(short, long)]
    denominator: Option<u8>,

    /// Don't open an audio device
    #[arg(long)]
    silent: bool,

    /// Stop after this many beats
    #[arg(long)]
    beats: Option<u64>,

    /// Run against a virtual clock with injected timer jitter and print the timeline
    #[arg(long)]
    simulate: bool,

    /// Worst-case timer lateness injected by --simulate, in milliseconds
    #[arg(long, default_value = "20")]
    jitter_ms: u64,

    /// Random seed for --simulate
    #[arg(long, default_value = "0")]
    seed: u64,
}

impl Args {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(tempo) = self.tempo {
            settings.tempo_bpm = tempo;
        }
        if let Some(numerator) = self.numerator {
            settings.numerator = numerator;
        }
        if let Some(denominator) = self.denominator {
            settings.denominator = denominator;
        }
    }
}

fn load_settings(args: &Args) -> Result<Settings, anyhow::Error> {
    let mut manager = ConfigManager::new(args.config.clone());
    let mut settings = manager.load()?;
    args.apply_overrides(&mut settings);
    ConfigManager::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
    Ok(settings)
}

fn open_audio(args: &Args, settings: &Settings) -> Arc<dyn AudioTrigger> {
    if args.silent {
        log::info!("Running silent");
        return Arc::new(SilentTrigger);
    }

    match ClickPlayer::new(ClickSound::from_settings(settings)) {
        Ok(player) => Arc::new(player),
        Err(e) => {
            log::warn!("{}; continuing without sound", e);
            Arc::new(SilentTrigger)
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = load_settings(&args)?;

    if args.simulate {
        let report = simulate::run(
            settings.meter()?,
            simulate::SimulationOptions {
                beats: args.beats.unwrap_or(16),
                max_jitter_ms: args.jitter_ms,
                seed: args.seed,
            },
        )?;
        report.print();
        return Ok(());
    }

    let audio = open_audio(&args, &settings);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(play(settings, audio, args.beats))
}

async fn play(
    settings: Settings,
    audio: Arc<dyn AudioTrigger>,
    beat_limit: Option<u64>,
) -> Result<(), anyhow::Error> {
    let console = MetronomeConsole::with_tokio(audio, &settings)?;
    let numerator = console.meter().numerator();

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let console_task = tokio::spawn(console.run_with_channels(command_rx, event_tx));

    println!("{}", input::HELP);
    input::spawn_reader(command_tx.clone())?;
    command_tx.send(MetronomeCommand::Start)?;

    pump_events(event_rx, command_tx, numerator, beat_limit, tokio::signal::ctrl_c()).await;

    console_task.await??;
    Ok(())
}

/// Show console events until shutdown completes, asking for shutdown once the
/// beat limit is reached or `interrupt` resolves. Returns the beats counted.
async fn pump_events<I>(
    mut event_rx: mpsc::UnboundedReceiver<MetronomeEvent>,
    command_tx: mpsc::UnboundedSender<MetronomeCommand>,
    numerator: u8,
    beat_limit: Option<u64>,
    interrupt: I,
) -> u64
where
    I: Future,
{
    tokio::pin!(interrupt);
    let mut interrupted = false;

    let mut display = BeatDisplay::new(numerator);
    let mut beats_heard = 0u64;
    let mut stopping = false;

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                if let MetronomeEvent::ShutdownComplete = event {
                    break;
                }

                let counted =
                    display.playing && matches!(event, MetronomeEvent::BeatChanged { .. });
                display.show(&event);

                if counted {
                    beats_heard += 1;
                    if !stopping && beat_limit.is_some_and(|limit| beats_heard >= limit) {
                        log::info!("Played {} beats", beats_heard);
                        stopping = true;
                        let _ = command_tx.send(MetronomeCommand::Shutdown);
                    }
                }
            }
            _ = &mut interrupt, if !interrupted => {
                log::info!("Interrupted");
                interrupted = true;
                stopping = true;
                let _ = command_tx.send(MetronomeCommand::Shutdown);
            }
        }
    }

    beats_heard
}

/// Prints console events as a one-line beat indicator.
struct BeatDisplay {
    numerator: u8,
    playing: bool,
}

impl BeatDisplay {
    fn new(numerator: u8) -> Self {
        Self {
            numerator,
            playing: false,
        }
    }

    fn show(&mut self, event: &MetronomeEvent) {
        match event {
            MetronomeEvent::Started { meter } => {
                self.playing = true;
                self.numerator = meter.numerator();
                println!("Playing {} ({} ms per beat)", meter, meter.interval_ms());
            }
            MetronomeEvent::Stopped => {
                self.playing = false;
                println!("Stopped");
            }
            MetronomeEvent::BeatChanged { beat_index, .. } if self.playing => {
                println!("{}", self.indicator(*beat_index));
            }
            MetronomeEvent::BeatChanged { .. } => {}
            MetronomeEvent::MeterChanged { meter, interval_ms } => {
                self.numerator = meter.numerator();
                println!("Meter {} ({} ms per beat)", meter, interval_ms);
            }
            MetronomeEvent::Overrun {
                drift_ms,
                interval_ms,
            } => {
                println!("! beat {} ms late ({} ms interval)", drift_ms, interval_ms);
            }
            MetronomeEvent::State {
                meter,
                is_playing,
                current_beat,
                beats_played,
            } => {
                println!(
                    "{} | {} | beat {} of {} | {} beats played",
                    meter,
                    if *is_playing { "playing" } else { "stopped" },
                    current_beat + 1,
                    meter.numerator(),
                    beats_played
                );
            }
            MetronomeEvent::Error { message } => println!("Error: {}", message),
            MetronomeEvent::ShutdownComplete => {}
        }
    }

    fn indicator(&self, beat_index: u8) -> String {
        (0..self.numerator)
            .map(|beat| match (beat == beat_index, beat == 0) {
                (true, true) => "X",
                (true, false) => "x",
                (false, _) => ".",
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from(["tactus", "--tempo", "90", "-n", "7"]);
        let mut settings = Settings::default();
        args.apply_overrides(&mut settings);

        assert_eq!(settings.tempo_bpm, 90);
        assert_eq!(settings.numerator, 7);
        assert_eq!(settings.denominator, 4);
    }

    #[tokio::test]
    async fn test_interrupt_requests_shutdown_once() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (interrupt_tx, interrupt_rx) = tokio::sync::oneshot::channel::<()>();
        let pump = tokio::spawn(pump_events(event_rx, command_tx, 4, None, async move {
            let _ = interrupt_rx.await;
        }));

        let meter = tactus_core::Meter::default();
        event_tx.send(MetronomeEvent::Started { meter }).unwrap();
        interrupt_tx.send(()).unwrap();
        for beat_index in 0..3 {
            event_tx
                .send(MetronomeEvent::BeatChanged {
                    beat_index,
                    is_downbeat: beat_index == 0,
                })
                .unwrap();
        }

        assert_eq!(command_rx.recv().await, Some(MetronomeCommand::Shutdown));
        event_tx.send(MetronomeEvent::ShutdownComplete).unwrap();

        assert_eq!(pump.await.unwrap(), 3);
        assert!(command_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_beat_limit_requests_shutdown() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_events(
            event_rx,
            command_tx,
            4,
            Some(2),
            std::future::pending::<()>(),
        ));

        let meter = tactus_core::Meter::default();
        event_tx.send(MetronomeEvent::Started { meter }).unwrap();
        for beat_index in 0..2 {
            event_tx
                .send(MetronomeEvent::BeatChanged {
                    beat_index,
                    is_downbeat: beat_index == 0,
                })
                .unwrap();
        }

        assert_eq!(command_rx.recv().await, Some(MetronomeCommand::Shutdown));
        event_tx.send(MetronomeEvent::ShutdownComplete).unwrap();
        assert_eq!(pump.await.unwrap(), 2);
    }

    #[test]
    fn test_beat_indicator() {
        let display = BeatDisplay::new(4);
        assert_eq!(display.indicator(0), "X . . .");
        assert_eq!(display.indicator(2), ". . x .");
    }
}
