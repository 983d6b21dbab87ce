//! Error types for the RPC transport and the NFS layer

use prolink_core::types::{DeviceId, MediaSlot};
use prolink_core::ProlinkError;
use thiserror::Error;

/// Errors decoding XDR data
#[derive(Debug, Error, PartialEq, Eq)]
pub enum XdrError {
    /// Buffer ended before the value was complete
    #[error("Unexpected end of XDR data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A value was out of range for its type
    #[error("Invalid XDR value: {0}")]
    InvalidValue(String),
}

/// Errors raised by the RPC transport
#[derive(Debug, Error)]
pub enum RpcError {
    /// Socket level failure; the transport is marked disconnected
    #[error("RPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No reply after every configured attempt
    #[error("RPC call timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// Server refused the call (MSG_DENIED)
    #[error("RPC call denied (reject_stat {reject_stat})")]
    Denied { reject_stat: u32 },

    /// Server accepted the message but did not run the procedure
    #[error("RPC call not executed (accept_stat {accept_stat})")]
    Rejected { accept_stat: u32 },

    /// Reply did not follow the RPC message format
    #[error("Malformed RPC reply: {0}")]
    MalformedReply(String),

    /// Portmapper has no registration for the program
    #[error("Program {program} v{version} is not registered on the device")]
    ProgramUnavailable { program: u32, version: u32 },

    /// Transport was used after it lost its connection
    #[error("RPC transport is disconnected")]
    Disconnected,

    #[error("XDR decode error: {0}")]
    Decode(#[from] XdrError),
}

impl RpcError {
    /// Returns true if the failure may go away on a fresh transport.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_) | RpcError::Timeout { .. } | RpcError::Disconnected
        )
    }
}

/// Result type alias for NFS operations
pub type Result<T> = std::result::Result<T, NfsError>;

/// Errors raised by the NFS client and the file fetch service
#[derive(Debug, Error)]
pub enum NfsError {
    /// The device does not export the filesystem for this slot. Not retried.
    #[error("The slot ({slot}) is not exported on device {device_id}")]
    SlotNotExported { slot: MediaSlot, device_id: DeviceId },

    /// Slot has no NFS export at all (CD, empty)
    #[error("Slot {0} has no NFS export")]
    UnsupportedSlot(MediaSlot),

    /// MNT call returned a non-zero status
    #[error("Mounting export {export} failed with status {status}")]
    MountFailed { export: String, status: u32 },

    /// Handle used for a lookup is no longer valid, usually after the media
    /// in the slot changed
    #[error("Stale file handle while resolving {path}")]
    StaleHandle { path: String },

    /// A path segment could not be resolved
    #[error("Path not found: {path} (nfs status {status})")]
    PathNotFound { path: String, status: u32 },

    /// READ call returned a non-zero status
    #[error("Reading file failed with status {status}")]
    ReadFailed { status: u32 },

    /// Server stopped returning data before the file size was reached
    #[error("Short read: got {read} of {total} bytes")]
    ShortRead { read: u64, total: u64 },

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("XDR decode error: {0}")]
    Decode(#[from] XdrError),

    /// Rejected retry policy
    #[error("Invalid retry strategy: {0}")]
    InvalidRetryConfig(#[from] ProlinkError),
}

impl NfsError {
    /// Returns true if the transport underneath failed and a fresh one may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NfsError::Rpc(e) if e.is_transient())
    }

    /// Folds lookup failures into `PathNotFound`, leaving other errors untouched.
    pub fn into_not_found(self) -> Self {
        match self {
            NfsError::StaleHandle { path } => NfsError::PathNotFound {
                path,
                status: crate::programs::NFSERR_STALE,
            },
            other => other,
        }
    }
}
