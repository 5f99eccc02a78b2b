//! Connection-class method arguments (class id 10).

use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::wire::{ByteReader, ByteWriter, FieldTable};

/// connection.start - server greeting opening the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct Start {
    pub version_major: u8,
    pub version_minor: u8,
    pub server_properties: FieldTable,
    /// Space-separated list of SASL mechanism names.
    pub mechanisms: String,
    /// Space-separated list of locales.
    pub locales: String,
}

impl Start {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u8(self.version_major);
        w.put_u8(self.version_minor);
        self.server_properties.encode(buf)?;
        let mut w = ByteWriter::new(buf);
        w.put_long_bytes(self.mechanisms.as_bytes());
        w.put_long_bytes(self.locales.as_bytes());
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            version_major: r.read_u8()?,
            version_minor: r.read_u8()?,
            server_properties: FieldTable::decode(r)?,
            mechanisms: r.read_long_str()?.to_string(),
            locales: r.read_long_str()?.to_string(),
        })
    }
}

/// connection.start-ok - client identity and authentication response.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOk {
    pub client_properties: FieldTable,
    pub mechanism: String,
    /// Opaque SASL response; PLAIN embeds NUL bytes.
    pub response: Bytes,
    pub locale: String,
}

impl StartOk {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        self.client_properties.encode(buf)?;
        let mut w = ByteWriter::new(buf);
        w.put_short_str(&self.mechanism)?;
        w.put_long_bytes(&self.response);
        w.put_short_str(&self.locale)?;
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            client_properties: FieldTable::decode(r)?,
            mechanism: r.read_short_str()?.to_string(),
            response: Bytes::copy_from_slice(r.read_long_bytes()?),
            locale: r.read_short_str()?.to_string(),
        })
    }
}

/// connection.secure - additional authentication challenge.
#[derive(Debug, Clone, PartialEq)]
pub struct Secure {
    pub challenge: Bytes,
}

impl Secure {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        ByteWriter::new(buf).put_long_bytes(&self.challenge);
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            challenge: Bytes::copy_from_slice(r.read_long_bytes()?),
        })
    }
}

/// connection.secure-ok - challenge response.
#[derive(Debug, Clone, PartialEq)]
pub struct SecureOk {
    pub response: Bytes,
}

impl SecureOk {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        ByteWriter::new(buf).put_long_bytes(&self.response);
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            response: Bytes::copy_from_slice(r.read_long_bytes()?),
        })
    }
}

/// connection.tune / tune-ok - limit negotiation. Same wire layout both
/// directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tune {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

impl Tune {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(self.channel_max);
        w.put_u32(self.frame_max);
        w.put_u16(self.heartbeat);
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_max: r.read_u16()?,
            frame_max: r.read_u32()?,
            heartbeat: r.read_u16()?,
        })
    }
}

/// connection.open - select the virtual host.
#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    pub virtual_host: String,
}

impl Open {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_short_str(&self.virtual_host)?;
        w.put_short_str("")?; // reserved (capabilities)
        w.put_u8(0); // reserved (insist)
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let virtual_host = r.read_short_str()?.to_string();
        let _ = r.read_short_str()?;
        let _ = r.read_u8()?;
        Ok(Self { virtual_host })
    }
}

/// connection.close / channel.close share this layout: the failing
/// method (if any) is identified by class and method id.
#[derive(Debug, Clone, PartialEq)]
pub struct Close {
    pub reply_code: u16,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

impl Close {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(self.reply_code);
        w.put_short_str(&self.reply_text)?;
        w.put_u16(self.class_id);
        w.put_u16(self.method_id);
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            reply_code: r.read_u16()?,
            reply_text: r.read_short_str()?.to_string(),
            class_id: r.read_u16()?,
            method_id: r.read_u16()?,
        })
    }
}

/// connection.blocked - broker stopped accepting publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Blocked {
    pub reason: String,
}

impl Blocked {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        ByteWriter::new(buf).put_short_str(&self.reason)
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            reason: r.read_short_str()?.to_string(),
        })
    }
}
