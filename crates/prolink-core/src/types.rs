//! Core data model shared across the Pro DJ Link stack.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Protocol-assigned device number (1-4 for players, 33 for mixers, ...).
///
/// Not globally unique over time: a player can be renumbered between sessions.
pub type DeviceId = u8;

/// Role a device plays on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// CDJ / XDJ player
    Cdj,
    /// DJM mixer
    Mixer,
    /// rekordbox running on a computer
    Rekordbox,
    /// Any other type byte seen on the wire
    Unknown(u8),
}

impl DeviceType {
    /// Returns the byte used on the wire for this type.
    pub fn as_byte(&self) -> u8 {
        match self {
            DeviceType::Cdj => 0x01,
            DeviceType::Mixer => 0x03,
            DeviceType::Rekordbox => 0x04,
            DeviceType::Unknown(b) => *b,
        }
    }
}

impl From<u8> for DeviceType {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => DeviceType::Cdj,
            0x03 => DeviceType::Mixer,
            0x04 => DeviceType::Rekordbox,
            other => DeviceType::Unknown(other),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cdj => write!(f, "CDJ"),
            DeviceType::Mixer => write!(f, "Mixer"),
            DeviceType::Rekordbox => write!(f, "rekordbox"),
            DeviceType::Unknown(b) => write!(f, "Unknown(0x{:02x})", b),
        }
    }
}

/// A device seen on the network.
///
/// Built from an announce packet and never mutated afterwards; a later
/// announce for the same id produces a fresh value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device number
    pub id: DeviceId,
    /// Device role
    pub device_type: DeviceType,
    /// Display name (at most 20 bytes on the wire)
    pub name: String,
    /// IPv4 address of the device
    pub ip: Ipv4Addr,
    /// Hardware address of the device
    pub mac_addr: [u8; 6],
}

impl Device {
    /// Formats the MAC address as colon separated hex.
    pub fn mac_string(&self) -> String {
        self.mac_addr
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} ({}, {})",
            self.name, self.id, self.device_type, self.ip
        )
    }
}

/// Media bay on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSlot {
    Empty,
    Cd,
    Sd,
    Usb,
    /// rekordbox collection (laptop or internal link export)
    Rb,
}

impl MediaSlot {
    pub fn as_byte(&self) -> u8 {
        match self {
            MediaSlot::Empty => 0x00,
            MediaSlot::Cd => 0x01,
            MediaSlot::Sd => 0x02,
            MediaSlot::Usb => 0x03,
            MediaSlot::Rb => 0x04,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(MediaSlot::Empty),
            0x01 => Some(MediaSlot::Cd),
            0x02 => Some(MediaSlot::Sd),
            0x03 => Some(MediaSlot::Usb),
            0x04 => Some(MediaSlot::Rb),
            _ => None,
        }
    }
}

impl fmt::Display for MediaSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSlot::Empty => write!(f, "empty"),
            MediaSlot::Cd => write!(f, "CD"),
            MediaSlot::Sd => write!(f, "SD"),
            MediaSlot::Usb => write!(f, "USB"),
            MediaSlot::Rb => write!(f, "rekordbox"),
        }
    }
}

/// Kind of track loaded from a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    None,
    /// Analysed by rekordbox
    Rb,
    Unanalyzed,
    AudioCd,
}

impl TrackType {
    pub fn as_byte(&self) -> u8 {
        match self {
            TrackType::None => 0x00,
            TrackType::Rb => 0x01,
            TrackType::Unanalyzed => 0x02,
            TrackType::AudioCd => 0x05,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(TrackType::None),
            0x01 => Some(TrackType::Rb),
            0x02 => Some(TrackType::Unanalyzed),
            0x05 => Some(TrackType::AudioCd),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_bytes() {
        assert_eq!(DeviceType::from(0x01), DeviceType::Cdj);
        assert_eq!(DeviceType::from(0x03), DeviceType::Mixer);
        assert_eq!(DeviceType::from(0x04), DeviceType::Rekordbox);
        assert_eq!(DeviceType::from(0x09), DeviceType::Unknown(0x09));
        assert_eq!(DeviceType::Unknown(0x09).as_byte(), 0x09);
    }

    #[test]
    fn test_media_slot_bytes() {
        for slot in [
            MediaSlot::Empty,
            MediaSlot::Cd,
            MediaSlot::Sd,
            MediaSlot::Usb,
            MediaSlot::Rb,
        ] {
            assert_eq!(MediaSlot::from_byte(slot.as_byte()), Some(slot));
        }
        assert_eq!(MediaSlot::from_byte(0x42), None);
    }

    #[test]
    fn test_track_type_gap() {
        assert_eq!(TrackType::from_byte(0x05), Some(TrackType::AudioCd));
        assert_eq!(TrackType::from_byte(0x03), None);
    }

    #[test]
    fn test_device_display() {
        let device = Device {
            id: 2,
            device_type: DeviceType::Cdj,
            name: "CDJ-2000NXS2".to_string(),
            ip: Ipv4Addr::new(169, 254, 1, 2),
            mac_addr: [0x00, 0xe0, 0x36, 0x01, 0x02, 0x03],
        };

        assert_eq!(device.to_string(), "CDJ-2000NXS2 #2 (CDJ, 169.254.1.2)");
        assert_eq!(device.mac_string(), "00:e0:36:01:02:03");
    }
}
