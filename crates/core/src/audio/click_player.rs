use std::f32::consts::PI;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use rodio::buffer::SamplesBuffer;
use rodio::OutputStreamBuilder;
use tokio::sync::mpsc;

use super::{AudioTrigger, SoundKind};
use crate::error::{Result, TactusError};
use crate::messages::Settings;

/// Pre-rendered click samples (mono).
#[derive(Debug, Clone)]
pub struct ClickSound {
    sample_rate: u32,
    accent_samples: Vec<f32>,
    regular_samples: Vec<f32>,
}

impl ClickSound {
    pub const SAMPLE_RATE: u32 = 48_000;

    /// Regular beats play at this fraction of the accent's level.
    const REGULAR_LEVEL: f32 = 0.6;

    pub fn new(
        duration_ms: u32,
        accent_frequency_hz: f32,
        beat_frequency_hz: f32,
        volume: f32,
    ) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        let num_samples = (Self::SAMPLE_RATE as u64 * duration_ms as u64 / 1000) as usize;

        Self {
            sample_rate: Self::SAMPLE_RATE,
            accent_samples: Self::generate_click(num_samples, accent_frequency_hz, volume),
            regular_samples: Self::generate_click(
                num_samples,
                beat_frequency_hz,
                volume * Self::REGULAR_LEVEL,
            ),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.click_duration_ms,
            settings.accent_frequency_hz,
            settings.beat_frequency_hz,
            settings.click_volume,
        )
    }

    /// Sine burst with a fast exponential decay.
    fn generate_click(num_samples: usize, frequency: f32, amplitude: f32) -> Vec<f32> {
        let phase_increment = 2.0 * PI * frequency / Self::SAMPLE_RATE as f32;

        (0..num_samples)
            .map(|i| {
                let t = i as f32 / num_samples as f32;
                let envelope = (-t * 8.0).exp();
                (i as f32 * phase_increment).sin() * envelope * amplitude
            })
            .collect()
    }

    pub fn samples(&self, kind: SoundKind) -> &[f32] {
        match kind {
            SoundKind::Downbeat => &self.accent_samples,
            SoundKind::RegularBeat => &self.regular_samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Default for ClickSound {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Plays clicks on the default output device.
///
/// The output stream lives on its own thread. `play_sound` only queues the
/// request, and each click is added to the output mixer as an independent
/// source, so clicks that overlap are mixed rather than cut off.
pub struct ClickPlayer {
    tx: mpsc::UnboundedSender<SoundKind>,
    _thread: JoinHandle<()>,
}

impl ClickPlayer {
    pub fn new(sound: ClickSound) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<SoundKind>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<std::result::Result<(), String>>(1);

        let thread = thread::Builder::new()
            .name("tactus-audio".to_string())
            .spawn(move || {
                let stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!(
                            "Failed to open audio output stream: {}",
                            e
                        )));
                        return;
                    }
                };

                while let Some(kind) = rx.blocking_recv() {
                    let samples = sound.samples(kind).to_vec();
                    stream
                        .mixer()
                        .add(SamplesBuffer::new(1, sound.sample_rate(), samples));
                }

                log::debug!("Audio thread exiting");
            })
            .map_err(|e| TactusError::Audio(format!("Failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Click player ready on default output device");
                Ok(Self {
                    tx,
                    _thread: thread,
                })
            }
            Ok(Err(message)) => {
                log::error!("{}", message);
                let _ = thread.join();
                Err(TactusError::Audio(message))
            }
            Err(_) => Err(TactusError::Audio(
                "audio thread exited during startup".to_string(),
            )),
        }
    }
}

impl AudioTrigger for ClickPlayer {
    fn play_sound(&self, kind: SoundKind) {
        if self.tx.send(kind).is_err() {
            log::warn!("Audio thread is gone; dropping {:?} click", kind);
        }
    }
}
