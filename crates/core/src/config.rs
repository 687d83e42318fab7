use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::Settings;
use crate::rhythm::meter::{Denominator, NUMERATOR_RANGE, TEMPO_RANGE};

/// Read-only configuration loader for Tactus settings.
///
/// Settings live in `config.json` under the platform config directory
/// (`~/.config/tactus/config.json` on Linux). A missing file means defaults.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub meter: MeterConfigSchema,
    pub click: ClickConfigSchema,
    pub diagnostics: DiagnosticsConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfigSchema {
    pub numerator: ConfigOption<u8>,
    pub denominator: ConfigOption<u8>,
    pub tempo_bpm: ConfigOption<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickConfigSchema {
    pub click_volume: ConfigOption<f32>,
    pub accent_frequency_hz: ConfigOption<f32>,
    pub beat_frequency_hz: ConfigOption<f32>,
    pub click_duration_ms: ConfigOption<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfigSchema {
    pub report_overruns: ConfigOption<bool>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
}

impl<T: PartialOrd> ConfigOption<T> {
    /// Whether `value` satisfies the option's range and choices.
    pub fn accepts(&self, value: &T) -> bool {
        let in_range = match &self.valid_range {
            Some((min, max)) => value >= min && value <= max,
            None => true,
        };
        let in_choices = match &self.valid_choices {
            Some(choices) => choices.iter().any(|choice| choice == value),
            None => true,
        };
        in_range && in_choices
    }
}

/// On-disk configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub settings: Settings,
}

impl ConfigManager {
    pub const FILE_NAME: &'static str = "config.json";

    /// Create a new configuration manager.
    /// If no path is provided, uses [`ConfigManager::default_path`].
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(Self::default_path);

        Self {
            config_path,
            settings: Settings::default(),
        }
    }

    /// `<config dir>/tactus/config.json`, or `./config.json` when the platform
    /// has no config directory.
    pub fn default_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("tactus").join(Self::FILE_NAME),
            None => PathBuf::from(Self::FILE_NAME),
        }
    }

    /// Load and validate settings from the configuration file.
    /// Returns default settings if the file doesn't exist.
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            log::info!(
                "No config file at {}, using defaults",
                self.config_path.display()
            );
            self.settings = Settings::default();
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {:?} doesn't match application version {}",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate_settings(&config_file.settings).map_err(ConfigError::ValidationError)?;

        log::info!("Loaded settings from {}", self.config_path.display());
        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Get current settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        let defaults = Settings::default();

        ConfigSchema {
            meter: MeterConfigSchema {
                numerator: ConfigOption {
                    default: defaults.numerator,
                    valid_range: Some((*NUMERATOR_RANGE.start(), *NUMERATOR_RANGE.end())),
                    valid_choices: None,
                    description: "Beats per measure".to_string(),
                },
                denominator: ConfigOption {
                    default: defaults.denominator,
                    valid_range: None,
                    valid_choices: Some(Denominator::ALL.iter().map(|d| d.value()).collect()),
                    description: "Note value that receives the beat".to_string(),
                },
                tempo_bpm: ConfigOption {
                    default: defaults.tempo_bpm,
                    valid_range: Some((*TEMPO_RANGE.start(), *TEMPO_RANGE.end())),
                    valid_choices: None,
                    description: "Tempo in beats per minute".to_string(),
                },
            },
            click: ClickConfigSchema {
                click_volume: ConfigOption {
                    default: defaults.click_volume,
                    valid_range: Some((0.0, 1.0)),
                    valid_choices: None,
                    description: "Click loudness, 0.0 to 1.0".to_string(),
                },
                accent_frequency_hz: ConfigOption {
                    default: defaults.accent_frequency_hz,
                    valid_range: Some((100.0, 8000.0)),
                    valid_choices: None,
                    description: "Pitch of the downbeat click in Hz".to_string(),
                },
                beat_frequency_hz: ConfigOption {
                    default: defaults.beat_frequency_hz,
                    valid_range: Some((100.0, 8000.0)),
                    valid_choices: None,
                    description: "Pitch of the regular beat click in Hz".to_string(),
                },
                click_duration_ms: ConfigOption {
                    default: defaults.click_duration_ms,
                    valid_range: Some((5, 200)),
                    valid_choices: None,
                    description: "Length of each click in milliseconds".to_string(),
                },
            },
            diagnostics: DiagnosticsConfigSchema {
                report_overruns: ConfigOption {
                    default: defaults.report_overruns,
                    valid_range: None,
                    valid_choices: None,
                    description: "Log a warning when a beat fires more than one interval late"
                        .to_string(),
                },
            },
        }
    }

    /// Validate settings against schema, collecting every violation.
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        // Meter
        check(&mut errors, "numerator", &schema.meter.numerator, &settings.numerator);
        check(
            &mut errors,
            "denominator",
            &schema.meter.denominator,
            &settings.denominator,
        );
        check(&mut errors, "tempo_bpm", &schema.meter.tempo_bpm, &settings.tempo_bpm);

        // Click
        check(
            &mut errors,
            "click_volume",
            &schema.click.click_volume,
            &settings.click_volume,
        );
        check(
            &mut errors,
            "accent_frequency_hz",
            &schema.click.accent_frequency_hz,
            &settings.accent_frequency_hz,
        );
        check(
            &mut errors,
            "beat_frequency_hz",
            &schema.click.beat_frequency_hz,
            &settings.beat_frequency_hz,
        );
        check(
            &mut errors,
            "click_duration_ms",
            &schema.click.click_duration_ms,
            &settings.click_duration_ms,
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check<T>(errors: &mut Vec<String>, name: &str, option: &ConfigOption<T>, value: &T)
where
    T: PartialOrd + std::fmt::Debug,
{
    if option.accepts(value) {
        return;
    }
    if let Some((min, max)) = &option.valid_range {
        errors.push(format!("{} must be between {:?} and {:?}", name, min, max));
    } else if let Some(choices) = &option.valid_choices {
        errors.push(format!("{} must be one of: {:?}", name, choices));
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config file: {0}")]
    ParseError(String),
    #[error("Config validation errors: {}", .0.join(", "))]
    ValidationError(Vec<String>),
}
