//! Tagged fields, the building blocks of remote database messages.
//!
//! Every field starts with a one byte tag followed by its value. All integers
//! are big endian.

use crate::error::{RemoteDbError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const TAG_UINT8: u8 = 0x0f;
const TAG_UINT16: u8 = 0x10;
const TAG_UINT32: u8 = 0x11;
const TAG_BINARY: u8 = 0x14;
const TAG_STRING: u8 = 0x26;

/// Largest binary or string payload accepted from the wire, in bytes.
/// Album art is the biggest thing a player sends and stays far below this.
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Argument kind bytes listed in a message's argument table
pub const ARG_KIND_STRING: u8 = 0x02;
pub const ARG_KIND_BINARY: u8 = 0x03;
pub const ARG_KIND_NUMBER: u8 = 0x06;

/// A single wire field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Binary(Bytes),
    /// UTF-16BE text with a NUL terminator on the wire
    String(String),
}

impl Field {
    /// Kind byte used for this field in an argument table
    pub fn arg_kind(&self) -> u8 {
        match self {
            Field::String(_) => ARG_KIND_STRING,
            Field::Binary(_) => ARG_KIND_BINARY,
            Field::UInt8(_) | Field::UInt16(_) | Field::UInt32(_) => ARG_KIND_NUMBER,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Field::UInt8(v) => Some(*v as u32),
            Field::UInt16(v) => Some(*v as u32),
            Field::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Field::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Encoded size in bytes, tag included
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Field::UInt8(_) => 1,
            Field::UInt16(_) => 2,
            Field::UInt32(_) => 4,
            Field::Binary(b) => 4 + b.len(),
            Field::String(s) => 4 + 2 * (s.encode_utf16().count() + 1),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Field::UInt8(v) => {
                dst.put_u8(TAG_UINT8);
                dst.put_u8(*v);
            }
            Field::UInt16(v) => {
                dst.put_u8(TAG_UINT16);
                dst.put_u16(*v);
            }
            Field::UInt32(v) => {
                dst.put_u8(TAG_UINT32);
                dst.put_u32(*v);
            }
            Field::Binary(b) => {
                dst.put_u8(TAG_BINARY);
                dst.put_u32(b.len() as u32);
                dst.put_slice(b);
            }
            Field::String(s) => {
                let units: Vec<u16> = s.encode_utf16().chain(std::iter::once(0)).collect();
                dst.put_u8(TAG_STRING);
                dst.put_u32(units.len() as u32);
                for unit in units {
                    dst.put_u16(unit);
                }
            }
        }
    }

    /// Number of bytes the field at the front of `src` occupies, or `None`
    /// if more data is needed to tell.
    pub fn peek_len(src: &[u8]) -> Result<Option<usize>> {
        let Some(&tag) = src.first() else {
            return Ok(None);
        };

        let len = match tag {
            TAG_UINT8 => 2,
            TAG_UINT16 => 3,
            TAG_UINT32 => 5,
            TAG_BINARY | TAG_STRING => {
                if src.len() < 5 {
                    return Ok(None);
                }
                let count = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
                let unit = if tag == TAG_STRING { 2 } else { 1 };
                let payload = count * unit;
                if payload > MAX_FIELD_LEN {
                    return Err(RemoteDbError::InvalidField(format!(
                        "field length {} exceeds limit of {} bytes",
                        payload, MAX_FIELD_LEN
                    )));
                }
                5 + payload
            }
            other => {
                return Err(RemoteDbError::InvalidField(format!(
                    "unknown field tag 0x{:02x}",
                    other
                )))
            }
        };

        Ok(Some(len))
    }

    /// Decodes one complete field off the front of `src`. The caller must
    /// have checked [`Field::peek_len`] first.
    pub fn decode(src: &mut Bytes) -> Result<Field> {
        match Self::peek_len(src)? {
            Some(len) if len <= src.len() => {}
            _ => return Err(RemoteDbError::InvalidField("truncated field".to_string())),
        }

        let field = match src.get_u8() {
            TAG_UINT8 => Field::UInt8(src.get_u8()),
            TAG_UINT16 => Field::UInt16(src.get_u16()),
            TAG_UINT32 => Field::UInt32(src.get_u32()),
            TAG_BINARY => {
                let len = src.get_u32() as usize;
                Field::Binary(src.split_to(len))
            }
            _ => {
                let count = src.get_u32() as usize;
                let mut units = Vec::with_capacity(count);
                for _ in 0..count {
                    units.push(src.get_u16());
                }
                while units.last() == Some(&0) {
                    units.pop();
                }
                let text = String::from_utf16(&units)
                    .map_err(|_| RemoteDbError::InvalidField("invalid UTF-16 string".to_string()))?;
                Field::String(text)
            }
        };

        Ok(field)
    }
}

impl From<u32> for Field {
    fn from(value: u32) -> Self {
        Field::UInt32(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::String(value.to_string())
    }
}
