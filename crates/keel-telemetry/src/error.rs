//! Telemetry error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while setting up telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The base level or a directive could not be parsed as a filter.
    #[error("invalid log filter `{filter}`: {reason}")]
    InvalidFilter {
        /// The offending filter string.
        filter: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    InitError(String),

    /// The log directory could not be created.
    #[error("cannot create log directory {path}: {source}")]
    LogDirectory {
        /// Directory that was being created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
