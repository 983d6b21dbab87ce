//! XDR (RFC 4506) encoding for the subset of types used by RPC, portmap,
//! mount and NFSv2: unsigned integers, booleans, fixed and variable length
//! opaque data and strings. Everything is big endian and padded to 4 bytes.

use crate::error::XdrError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Builds an XDR encoded buffer
#[derive(Debug, Default)]
pub struct XdrWriter {
    buf: BytesMut,
}

impl XdrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u32(value as u32)
    }

    /// Fixed length opaque data, padded
    pub fn put_opaque_fixed(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self.buf.put_bytes(0, padding(data.len()));
        self
    }

    /// Variable length opaque data: length, data, padding
    pub fn put_opaque(&mut self, data: &[u8]) -> &mut Self {
        self.put_u32(data.len() as u32);
        self.put_opaque_fixed(data)
    }

    pub fn put_string(&mut self, value: &str) -> &mut Self {
        self.put_opaque(value.as_bytes())
    }

    /// Appends already encoded data
    pub fn put_raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads XDR values off the front of a buffer
#[derive(Debug, Clone)]
pub struct XdrReader {
    buf: Bytes,
}

impl XdrReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn ensure(&self, needed: usize) -> Result<(), XdrError> {
        if self.buf.remaining() < needed {
            return Err(XdrError::UnexpectedEof {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_u32(&mut self) -> Result<u32, XdrError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn get_bool(&mut self) -> Result<bool, XdrError> {
        match self.get_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(XdrError::InvalidValue(format!("{} is not a boolean", other))),
        }
    }

    pub fn get_opaque_fixed(&mut self, len: usize) -> Result<Bytes, XdrError> {
        let padded = len + padding(len);
        self.ensure(padded)?;
        let data = self.buf.split_to(len);
        self.buf.advance(padded - len);
        Ok(data)
    }

    pub fn get_opaque(&mut self) -> Result<Bytes, XdrError> {
        let len = self.get_u32()? as usize;
        self.get_opaque_fixed(len)
    }

    pub fn get_string(&mut self) -> Result<String, XdrError> {
        let data = self.get_opaque()?;
        String::from_utf8(data.to_vec())
            .map_err(|_| XdrError::InvalidValue("string is not valid UTF-8".to_string()))
    }

    pub fn skip(&mut self, len: usize) -> Result<(), XdrError> {
        self.ensure(len)?;
        self.buf.advance(len);
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Returns everything not yet read
    pub fn into_rest(self) -> Bytes {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_padding() {
        let mut w = XdrWriter::new();
        w.put_string("/C/");
        let encoded = w.finish();

        assert_eq!(&encoded[..], &[0, 0, 0, 3, b'/', b'C', b'/', 0]);

        let mut r = XdrReader::new(encoded);
        assert_eq!(r.get_string().unwrap(), "/C/");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_aligned_opaque_has_no_padding() {
        let mut w = XdrWriter::new();
        w.put_opaque(&[1, 2, 3, 4]).put_u32(9);
        let encoded = w.finish();
        assert_eq!(encoded.len(), 12);

        let mut r = XdrReader::new(encoded);
        assert_eq!(&r.get_opaque().unwrap()[..], &[1, 2, 3, 4]);
        assert_eq!(r.get_u32().unwrap(), 9);
    }

    #[test]
    fn test_truncated_input() {
        let mut r = XdrReader::new(Bytes::from_static(&[0, 0, 0, 8, 1, 2]));
        assert_eq!(
            r.get_opaque(),
            Err(XdrError::UnexpectedEof {
                needed: 8,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_invalid_bool() {
        let mut r = XdrReader::new(Bytes::from_static(&[0, 0, 0, 2]));
        assert!(matches!(r.get_bool(), Err(XdrError::InvalidValue(_))));
    }
}
