use prolink_core::ProlinkError;
use prolink_discovery::DiscoveryError;
use prolink_nfs::NfsError;
use prolink_remotedb::RemoteDbError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors surfaced by [`ProlinkNetwork`](crate::ProlinkNetwork)
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Config(#[from] ProlinkError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("File fetch error: {0}")]
    Nfs(#[from] NfsError),

    #[error("Remote database error: {0}")]
    RemoteDb(#[from] RemoteDbError),

    /// Network was already connected
    #[error("Network is already connected")]
    AlreadyConnected,

    /// Logging could not be initialised
    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}
