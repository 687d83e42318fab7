use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::AudioTrigger;
use crate::messages::{MetronomeCommand, MetronomeEvent, Settings};
use crate::rhythm::meter::{Denominator, Meter, TEMPO_RANGE};
use crate::rhythm::BeatSequencer;
use crate::scheduler::Overrun;
use crate::timer::{TimerBackend, TokioTimer};

/// Sequencer notifications, raised on timer tasks and forwarded by the
/// console loop.
#[derive(Debug)]
enum Notice {
    Beat { beat_index: u8, is_downbeat: bool },
    Overrun(Overrun),
}

/// Owns a [`BeatSequencer`] and drives it from UI commands.
pub struct MetronomeConsole {
    sequencer: BeatSequencer,
    report_overruns: bool,
    notice_rx: mpsc::UnboundedReceiver<Notice>,
    is_running: bool,
}

impl MetronomeConsole {
    pub fn new(
        backend: Arc<dyn TimerBackend>,
        audio: Arc<dyn AudioTrigger>,
        settings: &Settings,
    ) -> crate::Result<Self> {
        let meter = settings.meter()?;
        let sequencer = BeatSequencer::with_meter(backend, audio, meter);

        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let beat_tx = notice_tx.clone();
        sequencer.on_beat_changed(move |beat_index: u8, is_downbeat: bool| {
            let _ = beat_tx.send(Notice::Beat {
                beat_index,
                is_downbeat,
            });
        });
        sequencer.on_overrun(move |overrun| {
            let _ = notice_tx.send(Notice::Overrun(overrun));
        });

        Ok(Self {
            sequencer,
            report_overruns: settings.report_overruns,
            notice_rx,
            is_running: true,
        })
    }

    /// Console on the current tokio runtime.
    pub fn with_tokio(audio: Arc<dyn AudioTrigger>, settings: &Settings) -> crate::Result<Self> {
        let backend = TokioTimer::current()?;
        Self::new(Arc::new(backend), audio, settings)
    }

    pub fn sequencer(&self) -> &BeatSequencer {
        &self.sequencer
    }

    pub fn meter(&self) -> Meter {
        self.sequencer.meter()
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn shutdown(&mut self) {
        log::info!("Shutting down metronome console");
        self.sequencer.stop();
        self.is_running = false;
    }

    pub fn process_command(
        &mut self,
        command: MetronomeCommand,
        event_tx: &mpsc::UnboundedSender<MetronomeEvent>,
    ) -> Result<(), anyhow::Error> {
        use MetronomeCommand::*;

        log::debug!("Processing command: {:?}", command);

        // Beats raised before this command go out before its events.
        self.forward_notices(event_tx);

        match command {
            // Transport
            Start => {
                self.sequencer.start()?;
                self.send_transport(event_tx);
            }
            Stop => {
                self.sequencer.stop();
                self.send_transport(event_tx);
            }
            Toggle => {
                self.sequencer.toggle()?;
                self.send_transport(event_tx);
            }

            // Meter
            Configure {
                numerator,
                denominator,
                tempo_bpm,
            } => {
                self.sequencer.configure(numerator, denominator, tempo_bpm)?;
                self.send_meter(event_tx);
            }
            SetTempo { tempo_bpm } => {
                self.sequencer.set_tempo(tempo_bpm)?;
                self.send_meter(event_tx);
            }
            NudgeTempo { delta_bpm } => {
                let current = self.sequencer.meter().tempo_bpm() as i32;
                let target = (current + delta_bpm as i32)
                    .clamp(*TEMPO_RANGE.start() as i32, *TEMPO_RANGE.end() as i32);
                self.sequencer.set_tempo(target as u16)?;
                self.send_meter(event_tx);
            }
            SetNumerator { numerator } => {
                self.sequencer.set_numerator(numerator)?;
                self.send_meter(event_tx);
            }
            SetDenominator { denominator } => {
                let denominator = Denominator::try_from(denominator)?;
                self.sequencer.set_denominator(denominator)?;
                self.send_meter(event_tx);
            }

            // System
            QueryState => {
                let _ = event_tx.send(MetronomeEvent::State {
                    meter: self.sequencer.meter(),
                    is_playing: self.sequencer.is_playing(),
                    current_beat: self.sequencer.current_beat(),
                    beats_played: self.sequencer.beats_played(),
                });
            }
            Shutdown => {
                self.shutdown();
                let _ = event_tx.send(MetronomeEvent::ShutdownComplete);
            }
        }

        self.forward_notices(event_tx);
        Ok(())
    }

    /// Run the console with channel-based communication
    pub async fn run_with_channels(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<MetronomeCommand>,
        event_tx: mpsc::UnboundedSender<MetronomeEvent>,
    ) -> Result<(), anyhow::Error> {
        log::info!("Metronome console starting: {}", self.sequencer.meter());

        loop {
            tokio::select! {
                // Commands from UI
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        log::info!("Command channel closed");
                        self.shutdown();
                        break;
                    };

                    if let MetronomeCommand::Shutdown = command {
                        log::info!("Received shutdown command");
                        self.forward_notices(&event_tx);
                        self.shutdown();
                        let _ = event_tx.send(MetronomeEvent::ShutdownComplete);
                        break;
                    }

                    if let Err(e) = self.process_command(command, &event_tx) {
                        log::error!("Command processing error: {}", e);
                        let _ = event_tx.send(MetronomeEvent::Error {
                            message: format!("Command processing error: {}", e),
                        });
                    }
                }

                // Beats and overruns from the sequencer
                Some(notice) = self.notice_rx.recv() => {
                    self.handle_notice(notice, &event_tx);
                }
            }
        }

        log::info!("Metronome console stopped");
        Ok(())
    }

    fn forward_notices(&mut self, event_tx: &mpsc::UnboundedSender<MetronomeEvent>) {
        while let Ok(notice) = self.notice_rx.try_recv() {
            self.handle_notice(notice, event_tx);
        }
    }

    fn handle_notice(&self, notice: Notice, event_tx: &mpsc::UnboundedSender<MetronomeEvent>) {
        match notice {
            Notice::Beat {
                beat_index,
                is_downbeat,
            } => {
                let _ = event_tx.send(MetronomeEvent::BeatChanged {
                    beat_index,
                    is_downbeat,
                });
            }
            Notice::Overrun(overrun) if self.report_overruns => {
                let _ = event_tx.send(MetronomeEvent::Overrun {
                    drift_ms: overrun.drift.as_millis() as u64,
                    interval_ms: overrun.interval.as_millis() as u64,
                });
            }
            Notice::Overrun(_) => {}
        }
    }

    fn send_transport(&self, event_tx: &mpsc::UnboundedSender<MetronomeEvent>) {
        let event = if self.sequencer.is_playing() {
            MetronomeEvent::Started {
                meter: self.sequencer.meter(),
            }
        } else {
            MetronomeEvent::Stopped
        };
        let _ = event_tx.send(event);
    }

    fn send_meter(&self, event_tx: &mpsc::UnboundedSender<MetronomeEvent>) {
        let _ = event_tx.send(MetronomeEvent::MeterChanged {
            meter: self.sequencer.meter(),
            interval_ms: self.sequencer.interval_ms(),
        });
    }
}

impl std::fmt::Debug for MetronomeConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetronomeConsole")
            .field("sequencer", &self.sequencer)
            .field("report_overruns", &self.report_overruns)
            .field("is_running", &self.is_running)
            .finish()
    }
}
