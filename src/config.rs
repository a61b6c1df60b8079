//! Configuration System using Figment
//!
//! Strongly-typed configuration for a telemetry session. Configuration is layered:
//! 1. Built-in defaults (`TelemetryConfig::default()`)
//! 2. `config/telemetry.toml` (or any file passed to [`TelemetryConfig::load_from`])
//! 3. Environment variables prefixed with `TELEMETRY_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use serial_telemetry::config::TelemetryConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TelemetryConfig::load()?;
//! config.validate()?;
//! println!("Reading {} channels from {}", config.acquisition.channels, config.serial.port);
//! # Ok(())
//! # }
//! ```
//!
//! `TELEMETRY_SERIAL__BAUD_RATE=921600` overrides `serial.baud_rate`.

use crate::error::{AppResult, TelemetryError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/telemetry.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "TELEMETRY_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Serial transport settings
    pub serial: SerialSettings,
    /// Acquisition loop and queue settings
    pub acquisition: AcquisitionSettings,
    /// Per-channel ring buffer settings
    pub buffer: BufferSettings,
    /// Export defaults
    pub export: ExportSettings,
    /// Synthetic source used when running without hardware
    pub simulation: SimulationSettings,
    /// Logging output
    pub logging: LoggingSettings,
}

/// Serial port parameters handed to the transport factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port path (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout in milliseconds; bounds how quickly `stop()` is observed
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 50,
        }
    }
}

impl SerialSettings {
    /// Read timeout as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Acquisition loop and queue parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Number of integer values per frame
    pub channels: usize,
    /// Rows returned by one `read_event()` call
    pub samples_per_event: usize,
    /// Capacity of the producer/consumer row queue
    pub queue_capacity: usize,
    /// Upper bound on how long `stop()` waits for the loop to exit
    pub stop_timeout_ms: u64,
    /// Pause after a transient read error before the next read (0 = retry immediately)
    pub read_error_backoff_ms: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            channels: 2,
            samples_per_event: 2,
            queue_capacity: 10_000,
            stop_timeout_ms: 500,
            read_error_backoff_ms: 10,
        }
    }
}

impl AcquisitionSettings {
    /// Stop timeout as a `Duration`.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Read error backoff as a `Duration`.
    pub fn read_error_backoff(&self) -> Duration {
        Duration::from_millis(self.read_error_backoff_ms)
    }
}

/// Ring buffer sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Samples kept per channel
    pub length: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self { length: 20_000 }
    }
}

/// Defaults for `export` when the caller omits arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Output directory for exported files
    pub directory: PathBuf,
    /// File name prefix; the 1-based channel number follows it
    pub prefix: String,
    /// File extension including the dot; `.dat`/`.bin` select binary output
    pub extension: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            prefix: "channel".to_string(),
            extension: ".dat".to_string(),
        }
    }
}

/// Synthetic source parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Frames generated per second
    pub sample_rate_hz: f64,
    /// Relative amplitude of the added noise (0.0 - 1.0)
    pub noise: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1000.0,
            noise: 0.05,
        }
    }
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed format with colors (for development)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Load from `config/telemetry.toml` (if present) and `TELEMETRY_` environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, layered over defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(Some(path.as_ref())).extract()?)
    }

    /// The layered provider stack, exposed so callers can merge further overrides.
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(TelemetryConfig::default()));
        let figment = match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(TelemetryError::Validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(TelemetryError::Validation("serial.port must not be empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(TelemetryError::Validation("serial.baud_rate must be > 0".into()));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(TelemetryError::Validation(
                "serial.read_timeout_ms must be > 0".into(),
            ));
        }

        let checks = [
            ("acquisition.channels", self.acquisition.channels),
            ("acquisition.samples_per_event", self.acquisition.samples_per_event),
            ("acquisition.queue_capacity", self.acquisition.queue_capacity),
            ("buffer.length", self.buffer.length),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(TelemetryError::Validation(format!("{name} must be > 0")));
            }
        }

        if !(self.simulation.sample_rate_hz.is_finite() && self.simulation.sample_rate_hz > 0.0) {
            return Err(TelemetryError::Validation(format!(
                "Invalid simulation.sample_rate_hz {}",
                self.simulation.sample_rate_hz
            )));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TelemetryError::Validation(format!("Cannot serialize config: {e}")))
    }
}
