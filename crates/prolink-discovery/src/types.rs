//! Device lifecycle events

use chrono::{DateTime, Utc};
use prolink_core::types::Device;
use serde::{Deserialize, Serialize};

/// Event emitted when a device changes state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// Event type
    pub kind: DeviceEventKind,

    /// The device that triggered the event
    pub device: Device,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn new(kind: DeviceEventKind, device: Device) -> Self {
        Self {
            kind,
            device,
            timestamp: Utc::now(),
        }
    }
}

/// Types of device events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEventKind {
    /// First announce of a device that was not live
    Connected,

    /// Any valid announce, including the first one
    Announced,

    /// Device stopped announcing for longer than the device timeout
    Disconnected,
}
