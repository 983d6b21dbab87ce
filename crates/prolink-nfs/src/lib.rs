//! NFSv2 file access for Pro DJ Link players
//!
//! Players export the filesystems of their media slots over NFSv2 on top of
//! ONC-RPC/UDP. This crate provides:
//! - a retrying RPC transport with FIFO call ordering per device
//! - the mount and NFS procedures needed to read a file
//! - [`FileFetchService`], which caches transports and mounted root handles
//!   and recovers from root handles invalidated by media changes
//!
//! # Example
//!
//! ```no_run
//! use prolink_core::config::NfsConfig;
//! use prolink_core::types::{Device, DeviceType, MediaSlot};
//! use prolink_nfs::{FetchFileOptions, FileFetchService};
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = FileFetchService::new(&NfsConfig::default());
//!     let device = Device {
//!         id: 2,
//!         device_type: DeviceType::Cdj,
//!         name: "CDJ-2000NXS2".to_string(),
//!         ip: Ipv4Addr::new(169, 254, 32, 2),
//!         mac_addr: [0; 6],
//!     };
//!
//!     let options = FetchFileOptions::new(device, MediaSlot::Usb, "PIONEER/rekordbox/export.pdb")
//!         .with_progress(Box::new(|p| println!("{}/{}", p.read, p.total)));
//!     let pdb = service.fetch_file(options).await?;
//!     println!("{} bytes", pdb.len());
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod programs;
pub mod rpc;
pub mod service;
pub mod xdr;

#[cfg(test)]
mod mock;

pub use error::{NfsError, Result, RpcError, XdrError};
pub use programs::{FetchProgress, FileHandle, FileInfo, ProgressFn};
pub use rpc::{RpcConnector, RpcProgram, RpcTransport, UdpConnector, UdpTransport};
pub use service::{export_for_slot, FetchFileOptions, FileFetchService};
