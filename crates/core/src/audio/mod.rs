pub mod click_player;

pub use click_player::{ClickPlayer, ClickSound};

/// Which click a beat should sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundKind {
    /// First beat of the measure.
    Downbeat,
    RegularBeat,
}

impl SoundKind {
    pub fn for_beat(beat_index: u8) -> Self {
        if beat_index == 0 {
            SoundKind::Downbeat
        } else {
            SoundKind::RegularBeat
        }
    }
}

/// Plays beat sounds on behalf of the sequencer.
///
/// Called from the scheduler's tick, so implementations must return without
/// waiting for playback and must tolerate overlapping calls.
pub trait AudioTrigger: Send + Sync {
    fn play_sound(&self, kind: SoundKind);
}

/// Trigger that only logs, for headless runs and machines without output.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentTrigger;

impl AudioTrigger for SilentTrigger {
    fn play_sound(&self, kind: SoundKind) {
        log::trace!("Silent click: {:?}", kind);
    }
}
