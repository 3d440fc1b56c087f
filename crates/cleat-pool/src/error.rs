//! Error types for cleat-pool
//!
//! Acquisition errors (`PoolClosed`, `Timeout`, `WaitQueueFull`) abort the
//! acquisition. Channel I/O errors carry the transport classification used
//! to decide whether the connection cohort is retired.

use std::time::Duration;
use thiserror::Error;

use cleat_transport::ServerAddress;

/// Result type for cleat-pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cleat-pool
#[derive(Error, Debug)]
pub enum Error {
    /// The pool has been closed; acquisition is permanently refused
    #[error("the pool has been closed")]
    PoolClosed,

    /// The acquisition deadline passed before capacity freed up
    #[error("timed out after {waited:?} waiting for a connection to {address}")]
    Timeout {
        /// Endpoint the acquisition was against
        address: ServerAddress,
        /// How long the caller waited before giving up
        waited: Duration,
    },

    /// Admission was refused by the wait-queue cap
    #[error("too many operations are already waiting for a connection; max wait queue size of {max_size} exceeded")]
    WaitQueueFull {
        /// The configured wait-queue cap
        max_size: usize,
    },

    /// An operation was invoked on a closed channel
    #[error("the channel has been closed")]
    ChannelClosed,

    /// Invalid pool settings
    #[error("configuration error: {message}")]
    Configuration {
        /// What is invalid
        message: String,
    },

    /// A reply correlated to a different request than the one awaited.
    ///
    /// This indicates a driver or server bug, not a broken wire; it never
    /// retires the connection cohort.
    #[error("the response-to id {actual} in the reply does not match the request id {expected}")]
    ResponseMismatch {
        /// Request id the caller was awaiting
        expected: i32,
        /// Request id the reply actually correlates to
        actual: i32,
    },

    /// A reply exceeded the caller-enforced message size cap
    #[error("reply length {length} exceeds maximum of {max}")]
    ResponseTooLarge {
        /// Declared reply length
        length: i32,
        /// Enforced cap
        max: i32,
    },

    /// A transport-level failure
    #[error(transparent)]
    Transport(#[from] cleat_transport::Error),
}

impl Error {
    /// Create a timeout error
    pub fn timeout(address: ServerAddress, waited: Duration) -> Self {
        Self::Timeout { address, waited }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error indicates a broken transport (and thus retires the
    /// connection cohort when raised on a channel)
    #[inline]
    pub fn is_transport_fault(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transport_fault(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classification() {
        assert!(Error::from(cleat_transport::Error::socket("reset")).is_transport_fault());
        assert!(!Error::from(cleat_transport::Error::interrupted("cancelled")).is_transport_fault());
        assert!(!Error::PoolClosed.is_transport_fault());
        assert!(!Error::ResponseMismatch {
            expected: 1,
            actual: 2
        }
        .is_transport_fault());
    }

    #[test]
    fn test_display() {
        let err = Error::WaitQueueFull { max_size: 5 };
        assert!(err.to_string().contains('5'));

        let err = Error::ResponseMismatch {
            expected: 7,
            actual: 8,
        };
        assert!(err.to_string().contains('7'));
        assert!(err.to_string().contains('8'));

        let err = Error::timeout(
            ServerAddress::new("db1.internal", 8417),
            Duration::from_millis(50),
        );
        assert!(err.to_string().contains("db1.internal:8417"));
        assert!(err.to_string().contains("50ms"));
    }

    #[test]
    fn test_timeout_carries_endpoint_and_wait() {
        let err = Error::timeout(ServerAddress::new("db2", 9000), Duration::from_millis(120));
        match err {
            Error::Timeout { address, waited } => {
                assert_eq!(address, ServerAddress::new("db2", 9000));
                assert_eq!(waited, Duration::from_millis(120));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
