pub mod beat_sequencer;
pub mod meter;

pub use beat_sequencer::{BeatObserver, BeatSequencer, OverrunHandler};
pub use meter::{interval_ms, Denominator, Meter, MeterChange, NUMERATOR_RANGE, TEMPO_RANGE};
