//! Error types for buffer, writer, and drain operations

use thiserror::Error;

/// Errors returned synchronously by [`DoubleBuffer::reserve`](crate::DoubleBuffer::reserve)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReserveError {
    /// The requested range can never fit in a slot
    #[error("Record of {size} bytes exceeds slot capacity of {capacity} bytes")]
    RecordTooLarge {
        /// Requested reservation size
        size: usize,
        /// Capacity of each slot
        capacity: usize,
    },

    /// No capacity is currently available; both slots are full or draining
    #[error("Buffer backpressure: no slot capacity available")]
    Backpressure,
}

/// Reasons a swap attempt did not promote the standby slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SwapError {
    /// Another thread is swapping or already sealed the active slot
    #[error("Swap lost to a concurrent swap")]
    Race,

    /// The standby slot has not been recycled by the drain yet
    #[error("Standby slot is still {0}")]
    StandbyBusy(crate::SlotState),

    /// A non-forced swap was requested on a slot that is not full
    #[error("Active slot is not full")]
    NotFull,
}

/// Errors returned by [`WriterHandle::append`](crate::WriterHandle::append)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppendError {
    /// The framed record exceeds slot capacity
    #[error("Record of {size} bytes exceeds slot capacity of {capacity} bytes")]
    RecordTooLarge {
        /// Framed record size
        size: usize,
        /// Capacity of each slot
        capacity: usize,
    },

    /// Backpressure persisted through the configured retries
    #[error("Backpressure after {attempts} attempts")]
    Backpressure {
        /// Number of reservation attempts made
        attempts: u32,
    },
}

/// Error reported by a [`Sink`](crate::Sink)
#[derive(Debug, Error)]
pub enum SinkError {
    /// I/O error while persisting
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sink accepted no bytes and reported no error
    #[error("Sink made no progress")]
    NoProgress,
}

/// Errors escalated by [`ReaderDrain`](crate::ReaderDrain)
#[derive(Debug, Error)]
pub enum DrainError {
    /// The sink kept failing after every configured retry
    #[error("Persisting slot {slot} failed after {attempts} attempts at offset {offset}: {source}")]
    PersistFailure {
        /// Slot being drained
        slot: usize,
        /// Number of persist attempts made
        attempts: u32,
        /// Bytes of the slot already acknowledged by the sink
        offset: usize,
        /// Last sink error
        #[source]
        source: SinkError,
    },

    /// Final drain could not empty both slots
    #[error("Shutdown drain did not complete: {0}")]
    Incomplete(String),
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A value is outside its allowed range
    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Reason the value was rejected
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type alias for drain operations
pub type DrainResult<T> = Result<T, DrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_error_messages() {
        let err = ReserveError::RecordTooLarge {
            size: 200,
            capacity: 100,
        };
        assert_eq!(
            err.to_string(),
            "Record of 200 bytes exceeds slot capacity of 100 bytes"
        );
        assert_eq!(
            ReserveError::Backpressure.to_string(),
            "Buffer backpressure: no slot capacity available"
        );
    }

    #[test]
    fn test_sink_error_from_io() {
        let io = std::io::Error::other("disk full");
        let err: SinkError = io.into();
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_persist_failure_keeps_source() {
        let err = DrainError::PersistFailure {
            slot: 1,
            attempts: 3,
            offset: 40,
            source: SinkError::NoProgress,
        };
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_swap_error_standby() {
        let err = SwapError::StandbyBusy(crate::SlotState::Draining);
        assert_eq!(err.to_string(), "Standby slot is still draining");
    }
}
