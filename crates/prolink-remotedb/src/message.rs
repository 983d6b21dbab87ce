//! Remote database messages.
//!
//! A message is a sequence of fields:
//!
//! | field            | kind   | contents                                  |
//! |------------------|--------|-------------------------------------------|
//! | magic            | UInt32 | `0x872349ae`                              |
//! | transaction id   | UInt32 | echoed by the server                      |
//! | type             | UInt16 | [`MessageType`]                           |
//! | argument count   | UInt8  | at most 12                                |
//! | argument kinds   | Binary | 12 bytes, one kind per argument, 0 padded |
//! | arguments        | any    |                                           |

use crate::error::{RemoteDbError, Result};
use crate::fields::Field;
use bytes::{Bytes, BytesMut};

pub const MESSAGE_MAGIC: u32 = 0x872349ae;

/// Upper bound on arguments per message
pub const MAX_ARGS: usize = 12;

/// Transaction id used for the setup message
pub const SETUP_TRANSACTION_ID: u32 = 0xfffffffe;

/// Size of the fixed header fields (magic, txid, type, argc, kind table)
pub const HEADER_LEN: usize = 5 + 5 + 3 + 2 + 5 + MAX_ARGS;

macro_rules! message_types {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)*) => {
        /// Message types known to this client
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $($(#[$doc])* $name,)*
        }

        impl MessageType {
            pub fn as_u16(&self) -> u16 {
                match self {
                    $(MessageType::$name => $value,)*
                }
            }

            pub fn from_u16(value: u16) -> Option<Self> {
                match value {
                    $($value => Some(MessageType::$name),)*
                    _ => None,
                }
            }
        }
    };
}

message_types! {
    Setup = 0x0000,
    Teardown = 0x0100,
    GetPlaylist = 0x1105,
    GetMetadata = 0x2002,
    GetArtwork = 0x2003,
    GetWaveformPreview = 0x2004,
    GetTrackInfo = 0x2102,
    GetGenericMetadata = 0x2202,
    GetBeatGrid = 0x2204,
    RenderMenu = 0x3000,
    /// Generic success, carries the item count for lookups
    Success = 0x4000,
    MenuHeader = 0x4001,
    Artwork = 0x4002,
    Error = 0x4003,
    MenuItem = 0x4101,
    MenuFooter = 0x4201,
    WaveformPreview = 0x4402,
    BeatGrid = 0x4602,
}

/// A decoded or outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub transaction_id: u32,
    pub kind: MessageType,
    pub args: Vec<Field>,
}

impl Message {
    pub fn new(transaction_id: u32, kind: MessageType, args: Vec<Field>) -> Self {
        Self {
            transaction_id,
            kind,
            args,
        }
    }

    /// Argument `index` as a number
    pub fn u32_arg(&self, index: usize) -> Result<u32> {
        self.args
            .get(index)
            .and_then(Field::as_u32)
            .ok_or(RemoteDbError::UnexpectedArgument {
                kind: self.kind,
                index,
            })
    }

    /// Argument `index` as text
    pub fn str_arg(&self, index: usize) -> Result<&str> {
        self.args
            .get(index)
            .and_then(Field::as_str)
            .ok_or(RemoteDbError::UnexpectedArgument {
                kind: self.kind,
                index,
            })
    }

    /// Argument `index` as a binary blob
    pub fn binary_arg(&self, index: usize) -> Result<Bytes> {
        self.args
            .get(index)
            .and_then(Field::as_bytes)
            .cloned()
            .ok_or(RemoteDbError::UnexpectedArgument {
                kind: self.kind,
                index,
            })
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        if self.args.len() > MAX_ARGS {
            return Err(RemoteDbError::InvalidMessage(format!(
                "{} arguments exceed the limit of {}",
                self.args.len(),
                MAX_ARGS
            )));
        }

        let mut kinds = [0u8; MAX_ARGS];
        for (kind, arg) in kinds.iter_mut().zip(&self.args) {
            *kind = arg.arg_kind();
        }

        dst.reserve(HEADER_LEN + self.args.iter().map(Field::encoded_len).sum::<usize>());

        Field::UInt32(MESSAGE_MAGIC).encode(dst);
        Field::UInt32(self.transaction_id).encode(dst);
        Field::UInt16(self.kind.as_u16()).encode(dst);
        Field::UInt8(self.args.len() as u8).encode(dst);
        Field::Binary(Bytes::copy_from_slice(&kinds)).encode(dst);

        for arg in &self.args {
            arg.encode(dst);
        }

        Ok(())
    }

    /// Length of the complete message at the front of `src`, or `None` if
    /// more data is needed.
    pub fn peek_len(src: &[u8]) -> Result<Option<usize>> {
        let mut offset = 0;
        let mut argc = None;
        let mut index = 0;

        loop {
            // Five header fields, then `argc` arguments
            let expected = match argc {
                Some(argc) => 5 + argc,
                None => 5,
            };
            if index == expected {
                return Ok(Some(offset));
            }

            let Some(len) = Field::peek_len(&src[offset..])? else {
                return Ok(None);
            };
            if src.len() < offset + len {
                return Ok(None);
            }

            if index == 3 {
                if src[offset] != 0x0f {
                    return Err(RemoteDbError::InvalidMessage(
                        "argument count is not a UInt8".to_string(),
                    ));
                }
                let count = src[offset + 1] as usize;
                if count > MAX_ARGS {
                    return Err(RemoteDbError::InvalidMessage(format!(
                        "argument count {} exceeds {}",
                        count, MAX_ARGS
                    )));
                }
                argc = Some(count);
            }

            offset += len;
            index += 1;
        }
    }

    /// Decodes one complete message
    pub fn decode(mut src: Bytes) -> Result<Message> {
        let magic = Field::decode(&mut src)?;
        if magic != Field::UInt32(MESSAGE_MAGIC) {
            return Err(RemoteDbError::InvalidMessage(format!(
                "bad magic {:?}",
                magic
            )));
        }

        let transaction_id = Field::decode(&mut src)?
            .as_u32()
            .ok_or_else(|| RemoteDbError::InvalidMessage("bad transaction id".to_string()))?;

        let raw_kind = match Field::decode(&mut src)? {
            Field::UInt16(kind) => kind,
            other => {
                return Err(RemoteDbError::InvalidMessage(format!(
                    "bad message type {:?}",
                    other
                )))
            }
        };
        let kind = MessageType::from_u16(raw_kind).ok_or_else(|| {
            RemoteDbError::InvalidMessage(format!("unknown message type 0x{:04x}", raw_kind))
        })?;

        let argc = Field::decode(&mut src)?
            .as_u32()
            .ok_or_else(|| RemoteDbError::InvalidMessage("bad argument count".to_string()))?
            as usize;

        // Argument kinds are implied by the field tags
        Field::decode(&mut src)?;

        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(Field::decode(&mut src)?);
        }

        Ok(Message {
            transaction_id,
            kind,
            args,
        })
    }
}
