//! Custom error types for the telemetry pipeline.
//!
//! This module defines the primary error type, `TelemetryError`, for the library. Using
//! the `thiserror` crate it gives one consistent way to report the failures that can
//! reach a caller: configuration problems, transport open failures, I/O during export
//! and misuse of the query/command API.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while layering TOML, environment and
//!   defaults.
//! - **`Validation`**: Semantic configuration errors (zero channels, zero capacity, an
//!   unknown log level) caught by `TelemetryConfig::validate`.
//! - **`Io`**: Wraps `std::io::Error` for file and device I/O.
//! - **`TransportOpen`**: The serial transport could not be opened. Fatal to one
//!   acquisition attempt only.
//! - **`ChannelOutOfRange`** / **`RowWidth`**: Caller asked for a channel or built a row
//!   that does not match the configured channel count.
//! - **`UnknownCommand`**: Text on the command surface that maps to no operation.
//!
//! Failures inside the acquisition loop never surface here; the loop logs them and
//! keeps running.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, TelemetryError>;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open transport '{port}': {message}")]
    TransportOpen { port: String, message: String },

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Channel {channel} out of range (session has {channels} channels)")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("Row has {actual} values, expected {expected}")]
    RowWidth { expected: usize, actual: usize },

    #[error("Unknown command: '{0}'")]
    UnknownCommand(String),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Acquisition thread error: {0}")]
    Thread(String),
}

impl From<figment::Error> for TelemetryError {
    fn from(value: figment::Error) -> Self {
        TelemetryError::Config(Box::new(value))
    }
}

impl TelemetryError {
    /// Whether a caller can retry the failed operation without changing configuration.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TelemetryError::Io(_)
                | TelemetryError::TransportOpen { .. }
                | TelemetryError::ChannelOutOfRange { .. }
                | TelemetryError::UnknownCommand(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_open_error_names_port() {
        let err = TelemetryError::TransportOpen {
            port: "/dev/ttyUSB0".into(),
            message: "No such file or directory".into(),
        };
        let text = err.to_string();
        assert!(text.contains("/dev/ttyUSB0"));
        assert!(text.contains("No such file"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn validation_errors_are_not_recoverable() {
        let err = TelemetryError::Validation("channels must be > 0".into());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn fails() -> AppResult<()> {
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(TelemetryError::Io(_))));
    }
}
