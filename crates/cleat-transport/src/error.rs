//! Error types for cleat-transport
//!
//! Socket faults are distinguished from interrupted reads because the two
//! have different consequences upstream: a socket fault retires the whole
//! connection cohort in the pool, an interrupted read is a cancellation.

use thiserror::Error;

/// Result type for cleat-transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cleat-transport
#[derive(Error, Debug)]
pub enum Error {
    /// The socket failed mid-operation (broken pipe, reset, refused, ...)
    #[error("socket error: {message}")]
    Socket {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A read was interrupted or timed out locally; the wire itself is not
    /// known to be broken
    #[error("interrupted read: {message}")]
    InterruptedRead { message: String },

    /// The connection was already closed by the local side
    #[error("connection is closed")]
    ConnectionClosed,

    /// An inbound frame exceeded the configured size cap
    #[error("message length {length} exceeds maximum of {max}")]
    MessageTooLarge { length: i32, max: i32 },

    /// Authentication handshake failed while opening the connection
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// A server address could not be parsed
    #[error("invalid server address: {message}")]
    InvalidAddress { message: String },
}

impl Error {
    /// Create a socket error
    pub fn socket(message: impl Into<String>) -> Self {
        Self::Socket {
            message: message.into(),
            source: None,
        }
    }

    /// Create an interrupted-read error
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::InterruptedRead {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Classify an I/O error.
    ///
    /// Interrupted, timed-out and would-block reads are attributed to
    /// cancellation rather than a broken wire; everything else is a socket
    /// fault.
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                Self::InterruptedRead {
                    message: err.to_string(),
                }
            }
            _ => Self::Socket {
                message: err.to_string(),
                source: Some(Box::new(err)),
            },
        }
    }

    /// Whether this error indicates a broken transport.
    ///
    /// Only these errors retire the connection cohort; interrupted reads,
    /// oversized messages and authentication failures do not.
    #[inline]
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::Socket { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_classification() {
        let err = Error::from_io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(matches!(err, Error::Socket { .. }));
        assert!(err.is_transport_fault());

        let err = Error::from_io(io::Error::new(io::ErrorKind::Interrupted, "signal"));
        assert!(matches!(err, Error::InterruptedRead { .. }));
        assert!(!err.is_transport_fault());

        let err = Error::from_io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(err, Error::InterruptedRead { .. }));
    }

    #[test]
    fn test_non_socket_errors_are_not_faults() {
        assert!(!Error::ConnectionClosed.is_transport_fault());
        assert!(!Error::authentication("bad credentials").is_transport_fault());
        assert!(!Error::MessageTooLarge {
            length: 100,
            max: 10
        }
        .is_transport_fault());
    }

    #[test]
    fn test_display() {
        let err = Error::socket("connection reset by peer");
        assert!(err.to_string().contains("connection reset by peer"));

        let err = Error::MessageTooLarge {
            length: 2048,
            max: 1024,
        };
        assert!(err.to_string().contains("2048"));
        assert!(err.to_string().contains("1024"));
    }
}
