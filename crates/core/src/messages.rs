use serde::{Deserialize, Serialize};

use crate::rhythm::meter::Meter;

/// Commands sent from the UI to the metronome console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetronomeCommand {
    // Transport
    Start,
    Stop,
    Toggle,

    // Meter
    Configure {
        numerator: u8,
        denominator: u8,
        tempo_bpm: u16,
    },
    SetTempo {
        tempo_bpm: u16,
    },
    /// Relative tempo change, clamped to the valid range.
    NudgeTempo {
        delta_bpm: i16,
    },
    SetNumerator {
        numerator: u8,
    },
    SetDenominator {
        denominator: u8,
    },

    // System
    QueryState,
    Shutdown,
}

/// Events sent from the metronome console back to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetronomeEvent {
    Started {
        meter: Meter,
    },
    Stopped,
    /// A beat sounded; `beat_index` 0 is the downbeat.
    BeatChanged {
        beat_index: u8,
        is_downbeat: bool,
    },
    MeterChanged {
        meter: Meter,
        interval_ms: u64,
    },
    /// A beat fired more than one interval late.
    Overrun {
        drift_ms: u64,
        interval_ms: u64,
    },
    State {
        meter: Meter,
        is_playing: bool,
        current_beat: u8,
        beats_played: u64,
    },
    Error {
        message: String,
    },
    ShutdownComplete,
}

/// User-adjustable metronome settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Meter
    pub numerator: u8,
    pub denominator: u8,
    pub tempo_bpm: u16,

    // Click sound
    pub click_volume: f32,
    pub accent_frequency_hz: f32,
    pub beat_frequency_hz: f32,
    pub click_duration_ms: u32,

    // Diagnostics
    pub report_overruns: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
            tempo_bpm: 120,
            click_volume: 0.8,
            accent_frequency_hz: 1600.0,
            beat_frequency_hz: 1000.0,
            click_duration_ms: 30,
            report_overruns: true,
        }
    }
}

impl Settings {
    /// The meter these settings describe, if valid.
    pub fn meter(&self) -> crate::Result<Meter> {
        Meter::from_raw(self.numerator, self.denominator, self.tempo_bpm)
    }
}
