//! Transport errors

use std::io;
use thiserror::Error;

/// A socket operation failed
///
/// The display strings are what the connection logs and what owners see
/// in a failed [`TaskOutcome`](crate::task::TaskOutcome).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection refused by host")]
    Refused,

    #[error("Socket timed out")]
    TimedOut,

    #[error("Connection reset by peer")]
    Reset,

    #[error("Connection aborted")]
    Aborted,

    #[error("Connection error: {0}")]
    Other(String),
}

impl TransportError {
    /// Maps an I/O error onto the cases the reconnect logic distinguishes
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::TimedOut,
            io::ErrorKind::ConnectionReset => Self::Reset,
            io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => Self::Aborted,
            _ => Self::Other(err.to_string()),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::from_io(&err)
    }
}

/// Misuse of a connection manager
///
/// Reported to the caller and logged; never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("A server cannot connect, use bind_and_accept instead")]
    ServerCannotConnect,

    #[error("A client cannot bind, use connect instead")]
    ClientCannotBind,

    #[error("Operation is only available in blocking mode")]
    RequiresBlocking,

    #[error("Operation is only available in non-blocking mode")]
    RequiresNonBlocking,

    #[error("Socket is not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_errors() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(TransportError::from_io(&refused), TransportError::Refused);

        let timeout = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(TransportError::from(timeout), TransportError::TimedOut);

        let other = io::Error::other("no route");
        assert!(matches!(TransportError::from(other), TransportError::Other(_)));
    }

    #[test]
    fn test_messages() {
        assert_eq!(TransportError::Refused.to_string(), "Connection refused by host");
        assert_eq!(TransportError::TimedOut.to_string(), "Socket timed out");
    }
}
