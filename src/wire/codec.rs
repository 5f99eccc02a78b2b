//! Bounds-checked cursors for AMQP scalar types.
//!
//! All multi-byte integers are Big Endian. Strings are length-prefixed
//! (u8 for short strings, u32 for long strings) and never NUL-terminated.
//!
//! # Example
//!
//! ```
//! use amqp_engine::wire::{ByteReader, ByteWriter};
//! use bytes::BytesMut;
//!
//! let mut buf = BytesMut::new();
//! let mut w = ByteWriter::new(&mut buf);
//! w.put_u16(0x0102);
//! w.put_short_str("queue").unwrap();
//!
//! let mut r = ByteReader::new(&buf);
//! assert_eq!(r.read_u16().unwrap(), 0x0102);
//! assert_eq!(r.read_short_str().unwrap(), "queue");
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{AmqpError, Result};

/// Monotonic read cursor over a byte slice.
///
/// Every read validates the remaining length and fails with
/// [`AmqpError::Truncated`] instead of panicking.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current cursor position.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take the next `n` bytes as a slice.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(AmqpError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a u8-length-prefixed short string.
    pub fn read_short_str(&mut self) -> Result<&'a str> {
        let len = self.read_u8()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map_err(|_| AmqpError::Framing("short string is not valid UTF-8".into()))
    }

    /// Read a u32-length-prefixed long byte string.
    pub fn read_long_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Read a long string that must be textual (mechanism/locale lists).
    pub fn read_long_str(&mut self) -> Result<&'a str> {
        let bytes = self.read_long_bytes()?;
        std::str::from_utf8(bytes)
            .map_err(|_| AmqpError::Framing("long string is not valid UTF-8".into()))
    }
}

/// Write cursor appending AMQP scalars to a `BytesMut`.
pub struct ByteWriter<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    #[inline]
    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    #[inline]
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    #[inline]
    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_u32(v.to_bits());
    }

    #[inline]
    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_u64(v.to_bits());
    }

    #[inline]
    pub fn put_slice(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    /// Write a u8-length-prefixed short string. Fails if longer than 255
    /// bytes.
    pub fn put_short_str(&mut self, s: &str) -> Result<()> {
        if s.len() > u8::MAX as usize {
            return Err(AmqpError::Framing(format!(
                "short string of {} bytes exceeds 255",
                s.len()
            )));
        }
        self.buf.put_u8(s.len() as u8);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    /// Write a u32-length-prefixed long byte string.
    pub fn put_long_bytes(&mut self, s: &[u8]) {
        self.buf.put_u32(s.len() as u32);
        self.buf.put_slice(s);
    }

    /// Access the underlying buffer (for length back-patching).
    pub fn inner(&mut self) -> &mut BytesMut {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip_big_endian() {
        let mut buf = BytesMut::new();
        let mut w = ByteWriter::new(&mut buf);
        w.put_u8(0x01);
        w.put_u16(0x0203);
        w.put_u32(0x04050607);
        w.put_u64(0x08090A0B0C0D0E0F);

        assert_eq!(
            &buf[..],
            &[
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
                0x0E, 0x0F
            ]
        );

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 0x0203);
        assert_eq!(r.read_u32().unwrap(), 0x04050607);
        assert_eq!(r.read_u64().unwrap(), 0x08090A0B0C0D0E0F);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_read_past_end_is_truncated() {
        let mut r = ByteReader::new(&[0x01, 0x02]);
        assert!(matches!(r.read_u32(), Err(AmqpError::Truncated)));
        // Failed read must not advance the cursor.
        assert_eq!(r.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn test_short_str_roundtrip() {
        let mut buf = BytesMut::new();
        ByteWriter::new(&mut buf).put_short_str("amq.topic").unwrap();
        assert_eq!(buf[0], 9);

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_short_str().unwrap(), "amq.topic");
    }

    #[test]
    fn test_short_str_too_long_rejected() {
        let long = "x".repeat(256);
        let mut buf = BytesMut::new();
        let result = ByteWriter::new(&mut buf).put_short_str(&long);
        assert!(matches!(result, Err(AmqpError::Framing(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_short_str_truncated_body() {
        // Length byte promises 5 bytes, only 3 present.
        let mut r = ByteReader::new(&[5, b'a', b'b', b'c']);
        assert!(matches!(r.read_short_str(), Err(AmqpError::Truncated)));
    }

    #[test]
    fn test_long_bytes_roundtrip() {
        let mut buf = BytesMut::new();
        ByteWriter::new(&mut buf).put_long_bytes(b"\x00guest\x00guest");
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_long_bytes().unwrap(), b"\x00guest\x00guest");
    }

    #[test]
    fn test_signed_and_float_roundtrip() {
        let mut buf = BytesMut::new();
        let mut w = ByteWriter::new(&mut buf);
        w.put_i8(-1);
        w.put_i16(-300);
        w.put_i32(-70000);
        w.put_i64(-5_000_000_000);
        w.put_f32(1.5);
        w.put_f64(-2.25);

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_i8().unwrap(), -1);
        assert_eq!(r.read_i16().unwrap(), -300);
        assert_eq!(r.read_i32().unwrap(), -70000);
        assert_eq!(r.read_i64().unwrap(), -5_000_000_000);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_f64().unwrap(), -2.25);
    }
}
