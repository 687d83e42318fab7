pub use audio::{AudioTrigger, ClickPlayer, ClickSound, SilentTrigger, SoundKind};
pub use config::{ConfigError, ConfigManager, ConfigSchema};
pub use console::MetronomeConsole;
pub use error::{Result, TactusError};
pub use messages::{MetronomeCommand, MetronomeEvent, Settings};
pub use rhythm::{
    interval_ms, BeatObserver, BeatSequencer, Denominator, Meter, MeterChange, OverrunHandler,
    NUMERATOR_RANGE, TEMPO_RANGE,
};
pub use scheduler::{IntervalScheduler, Overrun, SchedulerOptions, SchedulerState};
pub use timer::{Clock, Deferrer, ManualTimer, TimerBackend, TimerHandle, TokioTimer};

pub mod audio;
pub mod config;
mod console;
mod error;
pub mod messages;
pub mod rhythm;
pub mod scheduler;
pub mod timer;
