//! # prolink-core
//!
//! Shared types, protocol constants, error handling and configuration for the
//! Pro DJ Link client stack.
//!
//! This crate provides the foundational building blocks used by the other
//! `prolink-*` crates:
//!
//! - **Types**: `Device`, `DeviceType`, `MediaSlot`, `TrackType` and the
//!   `DeviceId` alias.
//! - **Constants**: well-known ports and packet magic shared across the
//!   discovery, NFS and remote database layers.
//! - **Errors**: the top-level `ProlinkError` built with `thiserror`.
//! - **Configuration**: `ProlinkConfig`, loadable from YAML files or through the
//!   `config` crate with environment overrides.
//!
//! ## Example
//!
//! ```
//! use prolink_core::config::ProlinkConfig;
//!
//! let config = ProlinkConfig::from_yaml("discovery:\n  device_timeout_ms: 5000\n").unwrap();
//! assert_eq!(config.discovery.device_timeout_ms, 5000);
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::ProlinkConfig;
pub use error::{ProlinkError, Result};
pub use types::{Device, DeviceId, DeviceType, MediaSlot, TrackType};
