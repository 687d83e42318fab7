use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::{Result, TactusError};

/// Beats per measure accepted by the sequencer.
pub const NUMERATOR_RANGE: RangeInclusive<u8> = 1..=15;
/// Tempo in beats per minute accepted by the sequencer.
pub const TEMPO_RANGE: RangeInclusive<u16> = 40..=240;

/// Note value that receives the beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Denominator {
    Half,
    Quarter,
    Eighth,
    Sixteenth,
}

impl Denominator {
    pub const ALL: [Denominator; 4] = [
        Denominator::Half,
        Denominator::Quarter,
        Denominator::Eighth,
        Denominator::Sixteenth,
    ];

    pub fn value(&self) -> u8 {
        match self {
            Denominator::Half => 2,
            Denominator::Quarter => 4,
            Denominator::Eighth => 8,
            Denominator::Sixteenth => 16,
        }
    }
}

impl TryFrom<u8> for Denominator {
    type Error = TactusError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Denominator::Half),
            4 => Ok(Denominator::Quarter),
            8 => Ok(Denominator::Eighth),
            16 => Ok(Denominator::Sixteenth),
            other => Err(TactusError::invalid(format!(
                "denominator must be one of 2, 4, 8, 16 (got {})",
                other
            ))),
        }
    }
}

impl From<Denominator> for u8 {
    fn from(value: Denominator) -> Self {
        value.value()
    }
}

impl fmt::Display for Denominator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Milliseconds between beats: `round(60000 / (tempo * denominator / 4))`,
/// never less than 1.
pub fn interval_ms(tempo_bpm: u16, denominator: Denominator) -> u64 {
    // 60000 / (bpm * d / 4) == 240000 / (bpm * d); integer round-half-up.
    let divisor = tempo_bpm as u64 * denominator.value() as u64;
    if divisor == 0 {
        return 1;
    }
    ((240_000 + divisor / 2) / divisor).max(1)
}

/// A validated time signature and tempo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Meter {
    numerator: u8,
    denominator: Denominator,
    tempo_bpm: u16,
}

impl Meter {
    pub fn new(numerator: u8, denominator: Denominator, tempo_bpm: u16) -> Result<Self> {
        if !NUMERATOR_RANGE.contains(&numerator) {
            return Err(TactusError::invalid(format!(
                "numerator must be between {} and {} (got {})",
                NUMERATOR_RANGE.start(),
                NUMERATOR_RANGE.end(),
                numerator
            )));
        }
        if !TEMPO_RANGE.contains(&tempo_bpm) {
            return Err(TactusError::invalid(format!(
                "tempo must be between {} and {} BPM (got {})",
                TEMPO_RANGE.start(),
                TEMPO_RANGE.end(),
                tempo_bpm
            )));
        }

        Ok(Self {
            numerator,
            denominator,
            tempo_bpm,
        })
    }

    /// Validate a meter given as plain numbers, e.g. from settings.
    pub fn from_raw(numerator: u8, denominator: u8, tempo_bpm: u16) -> Result<Self> {
        Self::new(numerator, Denominator::try_from(denominator)?, tempo_bpm)
    }

    pub fn numerator(&self) -> u8 {
        self.numerator
    }

    pub fn denominator(&self) -> Denominator {
        self.denominator
    }

    pub fn tempo_bpm(&self) -> u16 {
        self.tempo_bpm
    }

    pub fn interval_ms(&self) -> u64 {
        interval_ms(self.tempo_bpm, self.denominator)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms())
    }

    /// Copy of this meter with the given fields replaced, validated.
    pub fn apply(&self, change: MeterChange) -> Result<Self> {
        let denominator = match change.denominator {
            Some(value) => Denominator::try_from(value)?,
            None => self.denominator,
        };
        Self::new(
            change.numerator.unwrap_or(self.numerator),
            denominator,
            change.tempo_bpm.unwrap_or(self.tempo_bpm),
        )
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: Denominator::Quarter,
            tempo_bpm: 120,
        }
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} @ {} BPM",
            self.numerator, self.denominator, self.tempo_bpm
        )
    }
}

/// Partial update to a [`Meter`]; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterChange {
    pub numerator: Option<u8>,
    pub denominator: Option<u8>,
    pub tempo_bpm: Option<u16>,
}

impl MeterChange {
    pub fn tempo(tempo_bpm: u16) -> Self {
        Self {
            tempo_bpm: Some(tempo_bpm),
            ..Default::default()
        }
    }

    pub fn numerator(numerator: u8) -> Self {
        Self {
            numerator: Some(numerator),
            ..Default::default()
        }
    }

    pub fn denominator(denominator: u8) -> Self {
        Self {
            denominator: Some(denominator),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.numerator.is_none() && self.denominator.is_none() && self.tempo_bpm.is_none()
    }
}
