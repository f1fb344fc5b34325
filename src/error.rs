//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire application.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can occur while talking to an instrument and while persisting
//! its readings.
//!
//! ## Error Hierarchy
//!
//! `DaqError` is an enum that consolidates various error sources:
//!
//! - **`Connection`**: The transport (serial port or TCP socket) could not be opened.
//! - **`Timeout`**: The instrument did not deliver a complete reply within the
//!   configured budget.
//! - **`Write`** / **`Read`**: An I/O failure in the middle of an exchange.
//! - **`Decode`**: The reply contained bytes that are not valid UTF-8 text.
//! - **`InvalidWidth`**: A bin width outside the allowed set was requested.
//! - **`Persistence`**: The filesystem refused a write, a copy or an archive while
//!   storing or staging data.
//! - **`Config`** / **`Configuration`**: Wraps `figment` loading errors and semantic
//!   validation failures respectively.
//!
//! Link-level variants are reported to the caller unchanged. Nothing here is fatal;
//! the scheduler decides whether repeated failures matter.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Cannot open {target}: {reason}")]
    Connection { target: String, reason: String },

    #[error("No complete reply from {target} within {budget:?}")]
    Timeout { target: String, budget: Duration },

    #[error("Failed to write to {target}: {source}")]
    Write {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read from {target}: {source}")]
    Read {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Reply to '{command}' is not valid text: {source}")]
    Decode {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("Bin width {0} min is not one of 10, 15, 20, 30, 60, 120, 180, 240, 360, 720, 1440")]
    InvalidWidth(u32),

    #[error("Timestamp {0} is outside the representable range")]
    TimestampOutOfRange(i64),

    #[error("Persistence error at '{}': {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl DaqError {
    /// Wraps a filesystem error with the path it concerned.
    pub fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DaqError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// True for failures of the link itself, as opposed to local storage or setup.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            DaqError::Connection { .. }
                | DaqError::Timeout { .. }
                | DaqError::Write { .. }
                | DaqError::Read { .. }
        )
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}
