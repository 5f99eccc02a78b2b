//! Frame struct and encoding.
//!
//! Every frame on the wire is `[type:u8][channel:u16][size:u32][payload][0xCE]`
//! with `size` counting payload bytes only. Heartbeat frames carry no
//! payload and always travel on channel 0.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{AmqpError, Result};

/// Method frame type marker.
pub const FRAME_METHOD: u8 = 1;
/// Content header frame type marker.
pub const FRAME_HEADER: u8 = 2;
/// Content body frame type marker.
pub const FRAME_BODY: u8 = 3;
/// Heartbeat frame type marker.
pub const FRAME_HEARTBEAT: u8 = 8;

/// Frame terminator byte.
pub const FRAME_END: u8 = 0xCE;

/// Length in bytes of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 7;

/// Header plus terminator: the per-frame cost around a payload.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 1;

/// The four frame kinds of AMQP 0-9-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Method,
    Header,
    Body,
    Heartbeat,
}

impl FrameKind {
    pub fn to_u8(self) -> u8 {
        match self {
            FrameKind::Method => FRAME_METHOD,
            FrameKind::Header => FRAME_HEADER,
            FrameKind::Body => FRAME_BODY,
            FrameKind::Heartbeat => FRAME_HEARTBEAT,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            FRAME_METHOD => Ok(FrameKind::Method),
            FRAME_HEADER => Ok(FrameKind::Header),
            FRAME_BODY => Ok(FrameKind::Body),
            FRAME_HEARTBEAT => Ok(FrameKind::Heartbeat),
            other => Err(AmqpError::Framing(format!(
                "unknown frame type 0x{:02x}",
                other
            ))),
        }
    }
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub channel: u16,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    pub fn method(channel: u16, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Method,
            channel,
            payload,
        }
    }

    pub fn header(channel: u16, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Header,
            channel,
            payload,
        }
    }

    pub fn body(channel: u16, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Body,
            channel,
            payload,
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            kind: FrameKind::Heartbeat,
            channel: 0,
            payload: Bytes::new(),
        }
    }

    /// Total encoded size including header and terminator.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Append the encoded frame to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(self.encoded_len());
        out.put_u8(self.kind.to_u8());
        out.put_u16(self.channel);
        out.put_u32(self.payload.len() as u32);
        out.put_slice(&self.payload);
        out.put_u8(FRAME_END);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = Frame::method(5, Bytes::from_static(b"\x00\x0a\x00\x0a"));
        let mut out = BytesMut::new();
        frame.encode(&mut out);

        assert_eq!(out.len(), frame.encoded_len());
        assert_eq!(out[0], FRAME_METHOD);
        assert_eq!(&out[1..3], &[0, 5]); // channel BE
        assert_eq!(&out[3..7], &[0, 0, 0, 4]); // size counts payload only
        assert_eq!(&out[7..11], b"\x00\x0a\x00\x0a");
        assert_eq!(out[11], FRAME_END);
    }

    #[test]
    fn test_heartbeat_is_empty_on_channel_zero() {
        let frame = Frame::heartbeat();
        assert_eq!(frame.channel, 0);
        assert!(frame.payload.is_empty());

        let mut out = BytesMut::new();
        frame.encode(&mut out);
        assert_eq!(&out[..], &[FRAME_HEARTBEAT, 0, 0, 0, 0, 0, 0, FRAME_END]);
    }

    #[test]
    fn test_kind_markers() {
        assert_eq!(FrameKind::from_u8(1).unwrap(), FrameKind::Method);
        assert_eq!(FrameKind::from_u8(2).unwrap(), FrameKind::Header);
        assert_eq!(FrameKind::from_u8(3).unwrap(), FrameKind::Body);
        assert_eq!(FrameKind::from_u8(8).unwrap(), FrameKind::Heartbeat);
        assert!(FrameKind::from_u8(4).is_err());
    }
}
