//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management and a two-state
//! machine for fragmented frames:
//! - `WaitingForHeader`: need at least 7 bytes
//! - `WaitingForPayload`: header parsed, need payload plus the end marker
//!
//! # Example
//!
//! ```
//! use amqp_engine::wire::{Frame, FrameBuffer};
//! use bytes::BytesMut;
//!
//! let mut wire = BytesMut::new();
//! Frame::heartbeat().encode(&mut wire);
//!
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&wire).unwrap();
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::BytesMut;

use crate::error::{AmqpError, Result};
use crate::wire::frame::{Frame, FrameKind, FRAME_END, FRAME_HEADER_SIZE};

/// Frame-max assumed until the tune negotiation settles on a real value.
pub const DEFAULT_FRAME_MAX: u32 = 131_072;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the complete 7-byte header.
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes plus the end marker.
    WaitingForPayload {
        kind: FrameKind,
        channel: u16,
        size: usize,
    },
}

/// Buffer accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    frame_max: u32,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_frame_max(DEFAULT_FRAME_MAX)
    }

    pub fn with_frame_max(frame_max: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForHeader,
            frame_max,
        }
    }

    /// Tighten or relax the size limit after tune negotiation.
    pub fn set_frame_max(&mut self, frame_max: u32) {
        self.frame_max = frame_max;
    }

    /// Number of buffered, not-yet-consumed bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Push data and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push. A framing
    /// violation (unknown type, oversized frame, missing end marker)
    /// poisons the stream and must be treated as fatal by the caller.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < FRAME_HEADER_SIZE {
                    return Ok(None);
                }

                let kind = FrameKind::from_u8(self.buffer[0])?;
                let channel = u16::from_be_bytes([self.buffer[1], self.buffer[2]]);
                let size = u32::from_be_bytes([
                    self.buffer[3],
                    self.buffer[4],
                    self.buffer[5],
                    self.buffer[6],
                ]);

                if size > self.frame_max {
                    return Err(AmqpError::Framing(format!(
                        "frame of {} bytes exceeds frame-max {}",
                        size, self.frame_max
                    )));
                }

                let _ = self.buffer.split_to(FRAME_HEADER_SIZE);
                self.state = State::WaitingForPayload {
                    kind,
                    channel,
                    size: size as usize,
                };
                self.try_extract_one()
            }

            State::WaitingForPayload {
                kind,
                channel,
                size,
            } => {
                // Payload plus the end marker must be present in full.
                if self.buffer.len() < size + 1 {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(size).freeze();
                let end = self.buffer.split_to(1)[0];
                if end != FRAME_END {
                    return Err(AmqpError::Framing(format!(
                        "expected end marker 0xCE, found 0x{:02x}",
                        end
                    )));
                }

                self.state = State::WaitingForHeader;
                Ok(Some(Frame {
                    kind,
                    channel,
                    payload,
                }))
            }
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame_bytes(frame: &Frame) -> Vec<u8> {
        let mut out = BytesMut::new();
        frame.encode(&mut out);
        out.to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let frame = Frame::body(3, Bytes::from_static(b"hello"));
        let mut buffer = FrameBuffer::new();

        let frames = buffer.push(&frame_bytes(&frame)).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], frame);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let a = Frame::method(1, Bytes::from_static(b"\x00\x14\x00\x0a"));
        let b = Frame::heartbeat();
        let c = Frame::body(1, Bytes::from_static(b"payload"));

        let mut combined = Vec::new();
        combined.extend(frame_bytes(&a));
        combined.extend(frame_bytes(&b));
        combined.extend(frame_bytes(&c));

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames, vec![a, b, c]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = Frame::method(9, Bytes::from_static(b"\x00\x3c\x00\x28abc"));
        let wire = frame_bytes(&frame);

        let mut buffer = FrameBuffer::new();
        let mut collected = Vec::new();
        for byte in &wire {
            collected.extend(buffer.push(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(collected, vec![frame]);
    }

    #[test]
    fn test_fragment_boundary_inside_header() {
        let frame = Frame::body(2, Bytes::from_static(b"xyz"));
        let wire = frame_bytes(&frame);

        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(&wire[..4]).unwrap().is_empty());
        let frames = buffer.push(&wire[4..]).unwrap();
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_end_marker_missing_is_fatal() {
        let frame = Frame::body(2, Bytes::from_static(b"xyz"));
        let mut wire = frame_bytes(&frame);
        *wire.last_mut().unwrap() = 0x00;

        let mut buffer = FrameBuffer::new();
        let result = buffer.push(&wire);
        assert!(matches!(result, Err(AmqpError::Framing(_))));
    }

    #[test]
    fn test_unknown_frame_type_is_fatal() {
        // 'A' (0x41) as frame type: what a server speaking a different
        // protocol version would send back.
        let wire = [0x41u8, 0x4D, 0x51, 0x50, 0x00, 0x00, 0x09];
        let mut buffer = FrameBuffer::new();
        assert!(matches!(buffer.push(&wire), Err(AmqpError::Framing(_))));
    }

    #[test]
    fn test_oversized_frame_rejected_before_payload_arrives() {
        let mut buffer = FrameBuffer::with_frame_max(16);
        // Header announcing a 1 KiB body frame.
        let header = [3u8, 0, 1, 0, 0, 4, 0];
        let result = buffer.push(&header);
        assert!(matches!(result, Err(AmqpError::Framing(_))));
    }

    #[test]
    fn test_zero_length_payload_still_needs_end_marker() {
        let mut buffer = FrameBuffer::new();
        // Heartbeat header without its end marker: incomplete, not an error.
        let frames = buffer.push(&[8, 0, 0, 0, 0, 0, 0]).unwrap();
        assert!(frames.is_empty());

        let frames = buffer.push(&[FRAME_END]).unwrap();
        assert_eq!(frames, vec![Frame::heartbeat()]);
    }
}
