//! Error types for the remote database client

use crate::message::MessageType;
use prolink_core::types::DeviceId;
use thiserror::Error;

/// Result type alias for remote database operations
pub type Result<T> = std::result::Result<T, RemoteDbError>;

/// Errors raised by the remote database client
#[derive(Debug, Error)]
pub enum RemoteDbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation did not complete in time
    #[error("Timed out {operation}")]
    Timeout { operation: &'static str },

    /// TCP connection to the database server failed
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// Server answered the greeting or setup with something unexpected
    #[error("Handshake with device {device_id} failed: {reason}")]
    Handshake { device_id: DeviceId, reason: String },

    /// Bytes on the wire do not form a valid field
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Fields do not form a valid message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A response of the wrong type arrived; the stream cannot be trusted
    /// any longer and the connection is poisoned.
    #[error("Protocol desync: expected {expected:?}, got {actual:?}")]
    ProtocolDesync {
        expected: MessageType,
        actual: MessageType,
    },

    /// A previous exchange left the connection unusable
    #[error("Connection is desynchronized and must be discarded")]
    Desynced,

    /// Peer closed the stream
    #[error("Connection closed by peer")]
    Closed,

    /// A response argument was missing or of the wrong kind
    #[error("Unexpected argument {index} in {kind:?} response")]
    UnexpectedArgument { kind: MessageType, index: usize },
}

impl RemoteDbError {
    /// Returns true if the failure may go away on a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteDbError::Io(_)
                | RemoteDbError::Timeout { .. }
                | RemoteDbError::ConnectFailed { .. }
                | RemoteDbError::Closed
                | RemoteDbError::Desynced
                | RemoteDbError::ProtocolDesync { .. }
        )
    }

    /// Returns true if the connection that produced the error must be
    /// dropped.
    pub fn poisons_connection(&self) -> bool {
        !matches!(
            self,
            RemoteDbError::ConnectFailed { .. } | RemoteDbError::UnexpectedArgument { .. }
        )
    }
}
