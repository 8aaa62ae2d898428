//! Error types for the ductwork transport.
//!
//! Transport and framing failures surface immediately from the specific
//! send/receive call that hit them; higher layers abort the current
//! multi-step operation on first error rather than attempting recovery.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ductwork operations.
#[derive(Debug, Error)]
pub enum DuctworkError {
    // Transport errors
    #[error("transport unavailable for channel '{name}': {source}")]
    TransportUnavailable {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport closed by peer on channel '{channel}'")]
    TransportClosed { channel: String },

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    // Protocol errors
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    // Thread pool errors
    #[error("thread pool is stopped; task '{name}' rejected")]
    PoolStopped { name: String },

    // Store errors (external collaborators)
    #[error("subject not found: {subject}")]
    SubjectNotFound { subject: i32 },

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    // Validation errors
    #[error("validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for ductwork operations.
pub type Result<T> = std::result::Result<T, DuctworkError>;

impl From<std::io::Error> for DuctworkError {
    fn from(err: std::io::Error) -> Self {
        DuctworkError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl DuctworkError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DuctworkError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a protocol error from any displayable reason.
    pub fn protocol(reason: impl Into<String>) -> Self {
        DuctworkError::Protocol {
            reason: reason.into(),
        }
    }

    /// Whether this error ends the channel session it occurred on.
    ///
    /// Session-fatal errors mean the conversation is desynchronized and the
    /// channel must be abandoned; the registry and other channels are
    /// unaffected.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            DuctworkError::TransportClosed { .. }
                | DuctworkError::ShortRead { .. }
                | DuctworkError::Protocol { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DuctworkError::ShortRead {
            expected: 8,
            actual: 3,
        };
        assert_eq!(err.to_string(), "short read: expected 8 bytes, got 3");
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(DuctworkError::TransportClosed {
            channel: "control".into()
        }
        .is_session_fatal());
        assert!(DuctworkError::protocol("bad tag").is_session_fatal());
        assert!(!DuctworkError::SubjectNotFound { subject: 99 }.is_session_fatal());
    }

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DuctworkError = io.into();
        assert!(matches!(err, DuctworkError::Io { source: Some(_), .. }));
    }
}
