//! Pro DJ Link device discovery
//!
//! Devices on a Pro DJ Link network broadcast a keep-alive ("announce") packet
//! on UDP port 50000 roughly every 1.5 seconds. This crate:
//! - parses and builds announce packets
//! - tracks which devices are live, dropping them after a configurable
//!   silence timeout
//! - notifies subscribers when devices connect, announce or disconnect
//! - announces this process as a virtual CDJ so remote database servers will
//!   answer its queries
//!
//! # Example
//!
//! ```no_run
//! use prolink_core::config::DiscoveryConfig;
//! use prolink_discovery::{bind_announce_socket, DeviceManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DiscoveryConfig::default();
//!     let manager = DeviceManager::new(&config)?;
//!
//!     manager.start(Arc::new(bind_announce_socket(&config)?))?;
//!
//!     if let Some(device) = manager.get_device_ensured(2, Duration::from_secs(5)).await {
//!         println!("found {}", device);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod announcer;
pub mod error;
pub mod manager;
pub mod packet;
pub mod types;

pub use announcer::VirtualCdj;
pub use error::{DiscoveryError, Result};
pub use manager::{bind_announce_socket, DeviceManager};
pub use packet::{announce_packet, parse_announce};
pub use types::{DeviceEvent, DeviceEventKind};
