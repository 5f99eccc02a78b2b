//! Wire module - AMQP scalar codecs, field values, and framing.
//!
//! This module implements the byte-level protocol:
//! - Bounds-checked big-endian cursors over byte buffers
//! - The tagged field-value model (tables, arrays, decimals, strings)
//! - The four frame kinds and the 7-byte header + end-marker framing
//! - Frame buffer for accumulating partial reads

mod codec;
mod frame;
mod frame_buffer;
mod value;

pub use codec::{ByteReader, ByteWriter};
pub use frame::{
    Frame, FrameKind, FRAME_BODY, FRAME_END, FRAME_HEADER, FRAME_HEADER_SIZE, FRAME_HEARTBEAT,
    FRAME_METHOD, FRAME_OVERHEAD,
};
pub use frame_buffer::{FrameBuffer, DEFAULT_FRAME_MAX};
pub use value::{Decimal, FieldTable, FieldValue};
