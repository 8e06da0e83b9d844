//! Error types for Hot Rod operations.

use std::io;
use thiserror::Error;

use crate::protocol::constants::{
    status_name, COMMAND_TIMEOUT_STATUS, ILLEGAL_LIFECYCLE_STATE, NODE_SUSPECTED,
};

/// The main error type for Hot Rod operations.
#[derive(Debug, Error)]
pub enum HotRodError {
    /// Transport failures: connect refused, reset sockets, closed connections.
    #[error("connection error: {0}")]
    Connection(String),

    /// Framing violations such as a bad magic byte or a mismatched message id.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An error status reported by the server together with its message.
    #[error("server error {}: {message}", status_name(*status))]
    Server {
        /// Raw status byte from the response.
        status: u8,
        /// Message supplied by the server.
        message: String,
    },

    /// The server gave up executing the command in time (status `0x86`).
    #[error("server command timeout: {0}")]
    CommandTimeout(String),

    /// The client stopped waiting for a response.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A state this client cannot make sense of, e.g. an unknown status byte.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HotRodError {
    /// Builds the error for a response carrying an error status.
    pub fn from_status(status: u8, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == COMMAND_TIMEOUT_STATUS {
            HotRodError::CommandTimeout(message)
        } else {
            HotRodError::Server { status, message }
        }
    }

    /// Whether the dispatcher may retry the operation on another server.
    pub fn is_retryable(&self) -> bool {
        match self {
            HotRodError::Connection(_)
            | HotRodError::Protocol(_)
            | HotRodError::CommandTimeout(_)
            | HotRodError::Timeout(_)
            | HotRodError::Io(_) => true,
            HotRodError::Server { message, .. } => {
                message.contains(NODE_SUSPECTED) || message.contains(ILLEGAL_LIFECYCLE_STATE)
            }
            HotRodError::Configuration(_) | HotRodError::IllegalState(_) => false,
        }
    }

    /// Whether the failure says something about the server rather than the request.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            HotRodError::Connection(_)
                | HotRodError::Protocol(_)
                | HotRodError::Timeout(_)
                | HotRodError::Io(_)
        )
    }

    /// The server status byte, if this error came from a response.
    pub fn status(&self) -> Option<u8> {
        match self {
            HotRodError::Server { status, .. } => Some(*status),
            HotRodError::CommandTimeout(_) => Some(COMMAND_TIMEOUT_STATUS),
            _ => None,
        }
    }
}

/// A specialized `Result` type for Hot Rod operations.
pub type Result<T> = std::result::Result<T, HotRodError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{SERVER_ERROR_STATUS, UNKNOWN_VERSION_STATUS};

    #[test]
    fn test_connection_error_display() {
        let err = HotRodError::Connection("failed to connect to 10.0.0.1:11222".to_string());
        assert_eq!(
            err.to_string(),
            "connection error: failed to connect to 10.0.0.1:11222"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let err = HotRodError::Protocol("invalid magic 0x42".to_string());
        assert_eq!(err.to_string(), "protocol error: invalid magic 0x42");
    }

    #[test]
    fn test_server_error_display() {
        let err = HotRodError::from_status(UNKNOWN_VERSION_STATUS, "version 99");
        assert_eq!(
            err.to_string(),
            "server error UNKNOWN_VERSION: version 99"
        );
        assert_eq!(err.status(), Some(UNKNOWN_VERSION_STATUS));
    }

    #[test]
    fn test_command_timeout_is_distinguished() {
        let err = HotRodError::from_status(COMMAND_TIMEOUT_STATUS, "took too long");
        assert!(matches!(err, HotRodError::CommandTimeout(_)));
        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(COMMAND_TIMEOUT_STATUS));
    }

    #[test]
    fn test_server_errors_not_retried() {
        let err = HotRodError::from_status(SERVER_ERROR_STATUS, "boom");
        assert!(!err.is_retryable());
        assert!(!err.is_transport_failure());
    }

    #[test]
    fn test_suspected_node_is_retried() {
        let err = HotRodError::from_status(
            SERVER_ERROR_STATUS,
            "org.infinispan.remoting.transport.jgroups.SuspectException: node left",
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transport_errors_retryable() {
        assert!(HotRodError::Connection("reset".into()).is_retryable());
        assert!(HotRodError::Timeout("read".into()).is_retryable());
        assert!(HotRodError::Protocol("bad id".into()).is_transport_failure());
        assert!(!HotRodError::Configuration("x".into()).is_retryable());
        assert!(!HotRodError::IllegalState("x".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let err: HotRodError = io_err.into();
        assert!(matches!(err, HotRodError::Io(_)));
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HotRodError>();
    }
}
