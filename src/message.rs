//! Envelopes, basic-class properties, and received message shapes.
//!
//! A published or delivered message is an [`Envelope`]: the body bytes
//! plus the optional basic-class properties. On the wire the properties
//! travel in the content HEADER frame behind a 16-bit presence-flags word;
//! bit 0 is reserved as a continuation marker for future growth.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{AmqpError, Result};
use crate::methods::CLASS_BASIC;
use crate::wire::{ByteReader, ByteWriter, FieldTable};

/// Delivery-mode value for transient messages.
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;
/// Delivery-mode value for persistent messages.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

mod property_flags {
    pub const CONTENT_TYPE: u16 = 1 << 15;
    pub const CONTENT_ENCODING: u16 = 1 << 14;
    pub const HEADERS: u16 = 1 << 13;
    pub const DELIVERY_MODE: u16 = 1 << 12;
    pub const PRIORITY: u16 = 1 << 11;
    pub const CORRELATION_ID: u16 = 1 << 10;
    pub const REPLY_TO: u16 = 1 << 9;
    pub const EXPIRATION: u16 = 1 << 8;
    pub const MESSAGE_ID: u16 = 1 << 7;
    pub const TIMESTAMP: u16 = 1 << 6;
    pub const MESSAGE_TYPE: u16 = 1 << 5;
    pub const USER_ID: u16 = 1 << 4;
    pub const APP_ID: u16 = 1 << 3;
    pub const CLUSTER_ID: u16 = 1 << 2;
    /// Reserved continuation bit; must be clear.
    pub const CONTINUATION: u16 = 1;
}

/// The optional basic-class message properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Properties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    /// 1 = transient, 2 = persistent.
    pub delivery_mode: Option<u8>,
    /// 0-9.
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Per-message TTL in milliseconds, as a string.
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    pub message_type: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
}

impl Properties {
    /// The presence-flags word for this property set.
    fn flags(&self) -> u16 {
        use property_flags::*;
        let mut flags = 0;
        let mut mark = |present: bool, bit: u16| {
            if present {
                flags |= bit;
            }
        };
        mark(self.content_type.is_some(), CONTENT_TYPE);
        mark(self.content_encoding.is_some(), CONTENT_ENCODING);
        mark(self.headers.is_some(), HEADERS);
        mark(self.delivery_mode.is_some(), DELIVERY_MODE);
        mark(self.priority.is_some(), PRIORITY);
        mark(self.correlation_id.is_some(), CORRELATION_ID);
        mark(self.reply_to.is_some(), REPLY_TO);
        mark(self.expiration.is_some(), EXPIRATION);
        mark(self.message_id.is_some(), MESSAGE_ID);
        mark(self.timestamp.is_some(), TIMESTAMP);
        mark(self.message_type.is_some(), MESSAGE_TYPE);
        mark(self.user_id.is_some(), USER_ID);
        mark(self.app_id.is_some(), APP_ID);
        mark(self.cluster_id.is_some(), CLUSTER_ID);
        flags
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.flags());
        let put_str = |s: &Option<String>, buf: &mut BytesMut| -> Result<()> {
            if let Some(s) = s {
                ByteWriter::new(buf).put_short_str(s)?;
            }
            Ok(())
        };
        put_str(&self.content_type, buf)?;
        put_str(&self.content_encoding, buf)?;
        if let Some(headers) = &self.headers {
            headers.encode(buf)?;
        }
        if let Some(v) = self.delivery_mode {
            buf.put_u8(v);
        }
        if let Some(v) = self.priority {
            buf.put_u8(v);
        }
        put_str(&self.correlation_id, buf)?;
        put_str(&self.reply_to, buf)?;
        put_str(&self.expiration, buf)?;
        put_str(&self.message_id, buf)?;
        if let Some(v) = self.timestamp {
            buf.put_u64(v);
        }
        put_str(&self.message_type, buf)?;
        put_str(&self.user_id, buf)?;
        put_str(&self.app_id, buf)?;
        put_str(&self.cluster_id, buf)?;
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        use property_flags::*;
        let flags = r.read_u16()?;
        if flags & CONTINUATION != 0 {
            return Err(AmqpError::Framing(
                "property continuation flag is not supported".into(),
            ));
        }
        let mut props = Properties::default();
        let read_str = |bit: u16, r: &mut ByteReader<'_>| -> Result<Option<String>> {
            if flags & bit != 0 {
                Ok(Some(r.read_short_str()?.to_string()))
            } else {
                Ok(None)
            }
        };
        props.content_type = read_str(CONTENT_TYPE, r)?;
        props.content_encoding = read_str(CONTENT_ENCODING, r)?;
        if flags & HEADERS != 0 {
            props.headers = Some(FieldTable::decode(r)?);
        }
        if flags & DELIVERY_MODE != 0 {
            props.delivery_mode = Some(r.read_u8()?);
        }
        if flags & PRIORITY != 0 {
            props.priority = Some(r.read_u8()?);
        }
        props.correlation_id = read_str(CORRELATION_ID, r)?;
        props.reply_to = read_str(REPLY_TO, r)?;
        props.expiration = read_str(EXPIRATION, r)?;
        props.message_id = read_str(MESSAGE_ID, r)?;
        if flags & TIMESTAMP != 0 {
            props.timestamp = Some(r.read_u64()?);
        }
        props.message_type = read_str(MESSAGE_TYPE, r)?;
        props.user_id = read_str(USER_ID, r)?;
        props.app_id = read_str(APP_ID, r)?;
        props.cluster_id = read_str(CLUSTER_ID, r)?;
        Ok(props)
    }
}

/// A message to publish or a received message body with its properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    pub body: Bytes,
    pub properties: Properties,
}

impl Envelope {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            properties: Properties::default(),
        }
    }

    pub fn with_properties(body: impl Into<Bytes>, properties: Properties) -> Self {
        Self {
            body: body.into(),
            properties,
        }
    }

    /// Mark the message persistent (delivery-mode 2).
    pub fn persistent(mut self) -> Self {
        self.properties.delivery_mode = Some(DELIVERY_MODE_PERSISTENT);
        self
    }
}

impl From<&str> for Envelope {
    fn from(body: &str) -> Self {
        Envelope::new(Bytes::copy_from_slice(body.as_bytes()))
    }
}

impl From<Vec<u8>> for Envelope {
    fn from(body: Vec<u8>) -> Self {
        Envelope::new(Bytes::from(body))
    }
}

/// The payload of a content HEADER frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    pub class_id: u16,
    pub body_size: u64,
    pub properties: Properties,
}

impl ContentHeader {
    pub fn basic(body_size: u64, properties: Properties) -> Self {
        Self {
            class_id: CLASS_BASIC,
            body_size,
            properties,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(16);
        let mut w = ByteWriter::new(&mut buf);
        w.put_u16(self.class_id);
        w.put_u16(0); // weight, unused
        w.put_u64(self.body_size);
        self.properties.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload);
        let class_id = r.read_u16()?;
        let _weight = r.read_u16()?;
        let body_size = r.read_u64()?;
        let properties = Properties::decode(&mut r)?;
        Ok(Self {
            class_id,
            body_size,
            properties,
        })
    }
}

/// A fully assembled inbound message with its routing information.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub exchange: String,
    pub routing_key: String,
    pub envelope: Envelope,
}

impl Message {
    pub fn body(&self) -> &Bytes {
        &self.envelope.body
    }
}

/// A message pushed to a consumer by basic.deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: Message,
    pub consumer_tag: String,
    /// Per-channel monotonically increasing tag used for ack/reject.
    pub delivery_tag: u64,
    pub redelivered: bool,
}

/// A mandatory/immediate message the broker could not route.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnedMessage {
    pub message: Message,
    pub reply_code: u16,
    pub reply_text: String,
}

/// The result of a successful basic.get.
#[derive(Debug, Clone, PartialEq)]
pub struct GetMessage {
    pub message: Message,
    pub delivery_tag: u64,
    pub redelivered: bool,
    /// Messages remaining in the queue after this one.
    pub message_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_properties_is_zero_flags_word() {
        let header = ContentHeader::basic(5, Properties::default());
        let payload = header.encode().unwrap();
        // class(2) + weight(2) + body-size(8) + flags(2)
        assert_eq!(payload.len(), 14);
        assert_eq!(&payload[..2], &[0, 60]);
        assert_eq!(&payload[12..], &[0, 0]);
    }

    #[test]
    fn test_properties_roundtrip() {
        let props = Properties {
            content_type: Some("application/json".into()),
            delivery_mode: Some(DELIVERY_MODE_PERSISTENT),
            priority: Some(4),
            correlation_id: Some("req-17".into()),
            expiration: Some("60000".into()),
            timestamp: Some(1_700_000_000),
            headers: Some(FieldTable::new().with("retries", 2i32)),
            ..Properties::default()
        };
        let header = ContentHeader::basic(1024, props.clone());
        let payload = header.encode().unwrap();
        let decoded = ContentHeader::decode(&payload).unwrap();

        assert_eq!(decoded.class_id, CLASS_BASIC);
        assert_eq!(decoded.body_size, 1024);
        assert_eq!(decoded.properties, props);
    }

    #[test]
    fn test_flag_bit_positions() {
        let props = Properties {
            content_type: Some("text/plain".into()),
            cluster_id: Some("c".into()),
            ..Properties::default()
        };
        assert_eq!(props.flags(), (1 << 15) | (1 << 2));
    }

    #[test]
    fn test_continuation_bit_rejected() {
        // class + weight + body-size + flags word with bit 0 set
        let mut payload = vec![0u8, 60, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        payload.extend_from_slice(&[0x00, 0x01]);
        assert!(matches!(
            ContentHeader::decode(&payload),
            Err(AmqpError::Framing(_))
        ));
    }

    #[test]
    fn test_envelope_persistent_helper() {
        let envelope = Envelope::from("hello").persistent();
        assert_eq!(
            envelope.properties.delivery_mode,
            Some(DELIVERY_MODE_PERSISTENT)
        );
        assert_eq!(&envelope.body[..], b"hello");
    }
}
