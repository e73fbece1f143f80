//! Error types for replication sessions.

use cloudsync_protocol::ProtocolError;
use cloudsync_store::StoreError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur while replicating.
///
/// Cloneable so that the terminal failure of a connection worker can be
/// handed to every caller still waiting on that connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CloudError {
    /// Unknown user, wrong password, or a frame that failed to decrypt.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A bounded wait elapsed.
    #[error("{operation} timed out after {waited:?}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The stream was truncated or garbled.
    #[error("transmission error: {0}")]
    Transmission(String),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection was closed before the operation completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u8,
        /// Version announced by the peer.
        remote: u8,
    },

    /// The peer sent a message that is invalid at this point.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A collaborator store failed.
    #[error("store error: {0}")]
    Store(String),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl CloudError {
    /// Creates an authentication failure.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed(message.into())
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            waited,
        }
    }

    /// Creates a transmission error.
    pub fn transmission(message: impl Into<String>) -> Self {
        Self::Transmission(message.into())
    }

    /// Status code reported for this error to a remote caller.
    pub fn status(&self) -> u16 {
        match self {
            CloudError::AuthenticationFailed(_) => 401,
            CloudError::Timeout { .. } => 504,
            CloudError::Transmission(_)
            | CloudError::Transport(_)
            | CloudError::ConnectionClosed => 502,
            CloudError::VersionMismatch { .. } => 505,
            CloudError::Protocol(_) | CloudError::Codec(_) => 400,
            CloudError::Store(_) => 500,
        }
    }

    /// Text suitable for showing to the person who started the transfer.
    pub fn user_message(&self) -> &'static str {
        match self {
            CloudError::AuthenticationFailed(_) => {
                "The remote instance rejected the user name or password."
            }
            CloudError::Timeout { .. } => "The remote instance did not answer in time.",
            CloudError::Transmission(_) => "The data stream was interrupted or corrupted.",
            CloudError::Transport(_) => "The remote instance could not be reached.",
            CloudError::ConnectionClosed => "The remote instance closed the connection.",
            CloudError::VersionMismatch { .. } => {
                "The remote instance runs an incompatible protocol version."
            }
            CloudError::Protocol(_) | CloudError::Codec(_) => {
                "The remote instance sent an unexpected message."
            }
            CloudError::Store(_) => "Local data could not be read or written.",
        }
    }

    /// Returns true if retrying the whole transfer may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::Timeout { .. }
                | CloudError::Transmission(_)
                | CloudError::Transport(_)
                | CloudError::ConnectionClosed
        )
    }
}

impl From<io::Error> for CloudError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => {
                CloudError::Transmission(format!("stream truncated: {err}"))
            }
            _ => CloudError::Transport(err.to_string()),
        }
    }
}

impl From<StoreError> for CloudError {
    fn from(err: StoreError) -> Self {
        CloudError::Store(err.to_string())
    }
}

impl From<ProtocolError> for CloudError {
    fn from(err: ProtocolError) -> Self {
        CloudError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(CloudError::authentication("bad").status(), 401);
        assert_eq!(CloudError::timeout("ack", Duration::from_secs(1)).status(), 504);
        assert_eq!(CloudError::transmission("garbled").status(), 502);
        assert_eq!(
            CloudError::VersionMismatch { local: 1, remote: 2 }.status(),
            505
        );
        assert_eq!(CloudError::Store("disk".into()).status(), 500);
    }

    #[test]
    fn user_messages_are_distinct() {
        let auth = CloudError::authentication("x").user_message();
        let timeout = CloudError::timeout("x", Duration::ZERO).user_message();
        let stream = CloudError::transmission("x").user_message();
        assert_ne!(auth, timeout);
        assert_ne!(auth, stream);
        assert_ne!(timeout, stream);
    }

    #[test]
    fn retryable_errors() {
        assert!(CloudError::timeout("connect", Duration::from_secs(10)).is_retryable());
        assert!(CloudError::ConnectionClosed.is_retryable());
        assert!(!CloudError::authentication("wrong password").is_retryable());
        assert!(!CloudError::VersionMismatch { local: 1, remote: 2 }.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = CloudError::timeout("authentication response", Duration::from_secs(10));
        assert_eq!(err.to_string(), "authentication response timed out after 10s");

        let err = CloudError::VersionMismatch { local: 1, remote: 7 };
        assert!(err.to_string().contains("remote=7"));
    }

    #[test]
    fn io_errors_map_by_kind() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(CloudError::from(eof), CloudError::Transmission(_)));

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(CloudError::from(refused), CloudError::Transport(_)));
    }
}
