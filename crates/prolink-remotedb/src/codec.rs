//! `tokio_util` codec framing [`Message`]s on a byte stream.

use crate::error::RemoteDbError;
use crate::message::Message;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Frames remote database messages
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = RemoteDbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, RemoteDbError> {
        let Some(len) = Message::peek_len(src)? else {
            return Ok(None);
        };

        let frame = src.split_to(len).freeze();
        let message = Message::decode(frame)?;

        trace!(
            kind = ?message.kind,
            txid = message.transaction_id,
            args = message.args.len(),
            "Decoded message"
        );

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = RemoteDbError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), RemoteDbError> {
        message.encode(dst)
    }
}
