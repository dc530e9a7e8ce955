//! Error types for capture orchestration and inspection.

use std::path::PathBuf;
use swapcap_core::{ConfigError, DrainError, FrameError, SinkError};
use thiserror::Error;

/// Capture runtime errors.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Output sink could not be opened
    #[error("Failed to open output {path}: {source}")]
    SinkOpen {
        /// Output path
        path: PathBuf,
        /// Underlying sink error
        #[source]
        source: SinkError,
    },

    /// A thread could not be started
    #[error("Failed to spawn {name}: {source}")]
    Spawn {
        /// Thread name
        name: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A writer thread panicked
    #[error("Writer {0} panicked")]
    WriterPanicked(u32),

    /// The drain thread panicked
    #[error("Drain thread panicked")]
    DrainPanicked,

    /// The drain gave up on the sink
    #[error("Drain error: {0}")]
    Drain(#[from] DrainError),

    /// The blocking capture task was cancelled or panicked
    #[error("Capture task failed: {0}")]
    Task(String),

    /// Signal handling could not be installed
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

/// Capture file decode errors.
#[derive(Debug, Error)]
pub enum InspectError {
    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Framing does not allow record decoding
    #[error("Cannot inspect capture: {0}")]
    Frame(#[from] FrameError),
}

/// Result type alias for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_messages() {
        let err = CaptureError::WriterPanicked(3);
        assert_eq!(err.to_string(), "Writer 3 panicked");

        let err = CaptureError::SinkOpen {
            path: PathBuf::from("/nope/out.cap"),
            source: SinkError::NoProgress,
        };
        assert!(err.to_string().contains("/nope/out.cap"));
    }

    #[test]
    fn test_drain_error_conversion() {
        let drain = DrainError::Incomplete("slot 0 busy".to_string());
        let err: CaptureError = drain.into();
        assert!(err.to_string().contains("slot 0 busy"));
    }

    #[test]
    fn test_inspect_error_from_frame() {
        let err: InspectError = FrameError::Unframed.into();
        assert!(err.to_string().contains("without framing"));
    }
}
