//! Error handling for GCodeService
//!
//! Provides error types for every layer of the service:
//! - Transport errors (serial link, device reset)
//! - Engine errors (invalid configuration)
//! - Job file errors (opening and reading G-code files)
//!
//! All error types use `thiserror` for ergonomic error handling.
//! Errors raised inside the sender/receiver workers never cross a queue
//! boundary; they end up as log records, published events or released waiters.

use thiserror::Error;

/// Transport error type
///
/// Represents failures of the duplex byte stream to the firmware. Any of
/// these surfacing from a read or a write is fatal to the current session.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Failed to open the port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Transport has been closed or was never opened
    #[error("Transport is not open")]
    NotOpen,

    /// Connection lost while reading or writing
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Physical controller reset failed
    #[error("Controller reset failed: {reason}")]
    ResetFailed {
        /// The reason the reset failed.
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {reason}")]
    Io {
        /// The reason for the I/O error.
        reason: String,
    },
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof => TransportError::ConnectionLost {
                reason: err.to_string(),
            },
            _ => TransportError::Io {
                reason: err.to_string(),
            },
        }
    }
}

/// Engine error type
///
/// Raised when the service is started with settings it cannot run with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Invalid engine configuration
    #[error("Invalid engine configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration was rejected.
        reason: String,
    },
}

/// Job file error type
#[derive(Error, Debug, Clone)]
pub enum JobFileError {
    /// File does not exist
    #[error("Job file not found: {path}")]
    NotFound {
        /// The path that was requested.
        path: String,
    },

    /// File exists but could not be read
    #[error("Failed to read job file {path}: {reason}")]
    ReadFailed {
        /// The path that failed to read.
        path: String,
        /// The reason reading failed.
        reason: String,
    },
}

/// Main error type for GCodeService
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Engine error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Job file error
    #[error(transparent)]
    JobFile(#[from] JobFileError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a transport error
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Check if this is an engine error
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Error::Engine(_))
    }

    /// Check if this is a job file error
    pub fn is_job_file_error(&self) -> bool {
        matches!(self, Error::JobFile(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::FailedToOpen {
            port: "/dev/ttyAMA0".to_string(),
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to open port /dev/ttyAMA0: permission denied"
        );
        assert_eq!(TransportError::NotOpen.to_string(), "Transport is not open");
    }

    #[test]
    fn test_io_error_mapping() {
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        assert!(matches!(
            TransportError::from(broken),
            TransportError::ConnectionLost { .. }
        ));

        let other = std::io::Error::new(std::io::ErrorKind::InvalidData, "garbage");
        assert!(matches!(TransportError::from(other), TransportError::Io { .. }));
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = TransportError::NotOpen.into();
        assert!(err.is_transport_error());
        assert!(!err.is_engine_error());

        let err: Error = EngineError::InvalidConfig {
            reason: "reply_queue_size must be greater than 0".to_string(),
        }
        .into();
        assert!(err.is_engine_error());
        assert_eq!(
            err.to_string(),
            "Invalid engine configuration: reply_queue_size must be greater than 0"
        );

        let err: Error = JobFileError::NotFound {
            path: "part.gcode".to_string(),
        }
        .into();
        assert!(err.is_job_file_error());
    }
}
