//! Remote database client for Pro DJ Link players
//!
//! Players serve track metadata from the media in their slots over a TCP
//! protocol. A session is opened by asking the device for its database port,
//! exchanging a greeting and announcing the virtual CDJ's device number.
//! Requests are then answered either with a single message or, for menus,
//! with a lookup followed by paged rendering.
//!
//! # Example
//!
//! ```no_run
//! use prolink_core::config::{DiscoveryConfig, RemoteDbConfig};
//! use prolink_core::types::{MediaSlot, TrackType};
//! use prolink_discovery::{bind_announce_socket, DeviceManager};
//! use prolink_remotedb::RemoteDatabase;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let discovery = DiscoveryConfig::default();
//!     let devices = Arc::new(DeviceManager::new(&discovery)?);
//!     devices.start(Arc::new(bind_announce_socket(&discovery)?))?;
//!
//!     let database = RemoteDatabase::new(devices, RemoteDbConfig::default());
//!     if let Some(conn) = database.get(2).await? {
//!         let descriptor = conn.descriptor(MediaSlot::Usb, TrackType::Rb);
//!         let track = conn.get_metadata(descriptor, 1).await?;
//!         println!("{}", track.title);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod database;
pub mod error;
pub mod fields;
pub mod message;
pub mod queries;
pub mod query;
pub mod render;

#[cfg(test)]
mod testing;

pub use codec::MessageCodec;
pub use connection::{query_database_port, Connection, ConnectionGuard};
pub use database::RemoteDatabase;
pub use error::{RemoteDbError, Result};
pub use fields::Field;
pub use message::{Message, MessageType};
pub use query::{
    parse_beat_grid, Beat, Item, ItemType, LookupDescriptor, MenuTarget, Named, PlaylistContents,
    PlaylistEntry, Track, TrackColor, TrackEntry,
};
pub use render::{MenuItems, PAGE_SIZE};
