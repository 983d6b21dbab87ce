//! Pro DJ Link client stack
//!
//! Ties together the protocol crates:
//! - [`prolink_discovery`] tracks the devices announcing themselves on the
//!   network and optionally announces this process as a virtual CDJ
//! - [`prolink_nfs`] reads files off a player's media over NFSv2
//! - [`prolink_remotedb`] queries track metadata from a player's database
//!
//! [`ProlinkNetwork`] owns one of each and keeps their caches consistent with
//! the devices actually present.
//!
//! # Example
//!
//! ```no_run
//! use prolink::{init_tracing, ProlinkNetwork};
//! use prolink_core::config::ProlinkConfig;
//! use prolink_core::types::{MediaSlot, TrackType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProlinkConfig::from_file("prolink.yaml")?;
//!     init_tracing(&config.logging)?;
//!
//!     let network = ProlinkNetwork::new(config)?;
//!     network.connect().await?;
//!
//!     if let Some(conn) = network.remote_database(2).await? {
//!         let descriptor = conn.descriptor(MediaSlot::Usb, TrackType::Rb);
//!         let track = conn.get_metadata(descriptor, 1).await?;
//!         println!("{} by {:?}", track.title, track.artist);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod network;

pub use error::{NetworkError, Result};
pub use logging::init_tracing;
pub use network::ProlinkNetwork;

pub use prolink_core;
pub use prolink_discovery;
pub use prolink_nfs;
pub use prolink_remotedb;
