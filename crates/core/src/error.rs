use thiserror::Error;

use crate::config::ConfigError;

/// Result alias carrying [`TactusError`].
pub type Result<T> = std::result::Result<T, TactusError>;

/// Errors surfaced by the beat engine and its collaborators.
///
/// Only configuration is checked. Scheduling overruns are advisory and are
/// reported through the overrun callback, never as an error.
#[derive(Debug, Error)]
pub enum TactusError {
    /// A tempo, meter or interval value outside its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The audio output could not be opened or has gone away.
    #[error("audio error: {0}")]
    Audio(String),

    /// No async runtime to run timer tasks on.
    #[error("runtime unavailable: {0}")]
    Runtime(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TactusError {
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}
