//! Announce (keep-alive) packet codec.
//!
//! Layout of the 0x36 byte announce packet:
//!
//! ```text
//! 0x00  10  magic "Qspt1WmJOL"
//! 0x0a   1  packet subtype (0x06 = announce)
//! 0x0c  20  device name, NUL padded
//! 0x20   2  0x01 0x02
//! 0x22   2  packet length (big endian)
//! 0x24   1  device id
//! 0x26   6  MAC address
//! 0x2c   4  IPv4 address (big endian)
//! 0x34   1  device type
//! ```

use crate::error::{DiscoveryError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use prolink_core::constants::PROLINK_HEADER;
use prolink_core::types::{Device, DeviceType};
use std::net::Ipv4Addr;

/// Total length of an announce packet
pub const ANNOUNCE_PACKET_LEN: usize = 0x36;

/// Subtype byte identifying announce packets
pub const ANNOUNCE_SUBTYPE: u8 = 0x06;

const SUBTYPE_OFFSET: usize = 0x0a;
const NAME_OFFSET: usize = 0x0c;
const NAME_LEN: usize = 20;
const ID_OFFSET: usize = 0x24;
const MAC_OFFSET: usize = 0x26;
const IP_OFFSET: usize = 0x2c;
const TYPE_OFFSET: usize = 0x34;

/// Returns true if the packet starts with the Pro DJ Link magic header.
pub fn has_prolink_header(packet: &[u8]) -> bool {
    packet.len() >= PROLINK_HEADER.len() && packet[..PROLINK_HEADER.len()] == PROLINK_HEADER
}

/// Parses an announce packet into a [`Device`].
pub fn parse_announce(packet: &[u8]) -> Result<Device> {
    if !has_prolink_header(packet) {
        return Err(DiscoveryError::MalformedPacket("missing magic header".to_string()));
    }

    if packet.len() <= SUBTYPE_OFFSET || packet[SUBTYPE_OFFSET] != ANNOUNCE_SUBTYPE {
        return Err(DiscoveryError::MalformedPacket("not an announce packet".to_string()));
    }

    if packet.len() < ANNOUNCE_PACKET_LEN {
        return Err(DiscoveryError::MalformedPacket(format!(
            "truncated announce packet ({} bytes)",
            packet.len()
        )));
    }

    let raw_name = &packet[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
    let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    let name = std::str::from_utf8(&raw_name[..name_end])
        .map_err(|_| DiscoveryError::MalformedPacket("device name is not ASCII".to_string()))?
        .to_string();

    let mut mac_addr = [0u8; 6];
    mac_addr.copy_from_slice(&packet[MAC_OFFSET..MAC_OFFSET + 6]);

    let ip = Ipv4Addr::new(
        packet[IP_OFFSET],
        packet[IP_OFFSET + 1],
        packet[IP_OFFSET + 2],
        packet[IP_OFFSET + 3],
    );

    Ok(Device {
        id: packet[ID_OFFSET],
        device_type: DeviceType::from(packet[TYPE_OFFSET]),
        name,
        ip,
        mac_addr,
    })
}

/// Builds the announce packet for `device`. Inverse of [`parse_announce`].
///
/// Names longer than 20 bytes are truncated.
pub fn announce_packet(device: &Device) -> Bytes {
    let mut buf = BytesMut::with_capacity(ANNOUNCE_PACKET_LEN);

    buf.put_slice(&PROLINK_HEADER);
    buf.put_u8(ANNOUNCE_SUBTYPE);
    buf.put_u8(0x00);

    let mut name = [0u8; NAME_LEN];
    let name_bytes = device.name.as_bytes();
    let len = name_bytes.len().min(NAME_LEN);
    name[..len].copy_from_slice(&name_bytes[..len]);
    buf.put_slice(&name);

    buf.put_slice(&[0x01, 0x02]);
    buf.put_u16(ANNOUNCE_PACKET_LEN as u16);
    buf.put_u8(device.id);
    buf.put_u8(0x01);
    buf.put_slice(&device.mac_addr);
    buf.put_slice(&device.ip.octets());
    buf.put_slice(&[0x01, 0x00, 0x00, 0x00]);
    buf.put_u8(device.device_type.as_byte());
    buf.put_u8(0x00);

    buf.freeze()
}
