//! Error types for device discovery

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur during device discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Frame is not a well formed announce packet. Never surfaced to
    /// consumers of the manager; the frame is dropped.
    #[error("Malformed announce packet: {0}")]
    MalformedPacket(String),

    /// Announce socket could not be set up
    #[error("Failed to bind announce socket on {address}: {reason}")]
    BindFailed { address: String, reason: String },

    /// Invalid discovery configuration
    #[error("Invalid discovery configuration: {0}")]
    InvalidConfig(String),

    /// Discovery listener already started
    #[error("Device manager is already listening")]
    AlreadyStarted,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
