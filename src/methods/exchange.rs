//! Exchange-class method arguments (class id 40).

use bytes::BytesMut;

use crate::error::Result;
use crate::methods::{pack_bits, unpack_bits};
use crate::wire::{ByteReader, ByteWriter, FieldTable};

/// exchange.declare
#[derive(Debug, Clone, PartialEq)]
pub struct Declare {
    pub exchange: String,
    /// Exchange type name ("fanout", "direct", "topic", "headers").
    pub kind: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Declare {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0); // reserved (ticket)
        w.put_short_str(&self.exchange)?;
        w.put_short_str(&self.kind)?;
        w.put_u8(pack_bits(&[
            self.passive,
            self.durable,
            self.auto_delete,
            self.internal,
            self.no_wait,
        ]));
        self.arguments.encode(buf)
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        let exchange = r.read_short_str()?.to_string();
        let kind = r.read_short_str()?.to_string();
        let bits = unpack_bits::<5>(r.read_u8()?);
        Ok(Self {
            exchange,
            kind,
            passive: bits[0],
            durable: bits[1],
            auto_delete: bits[2],
            internal: bits[3],
            no_wait: bits[4],
            arguments: FieldTable::decode(r)?,
        })
    }
}

/// exchange.delete
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub exchange: String,
    pub if_unused: bool,
    pub no_wait: bool,
}

impl Delete {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0);
        w.put_short_str(&self.exchange)?;
        w.put_u8(pack_bits(&[self.if_unused, self.no_wait]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        let exchange = r.read_short_str()?.to_string();
        let bits = unpack_bits::<2>(r.read_u8()?);
        Ok(Self {
            exchange,
            if_unused: bits[0],
            no_wait: bits[1],
        })
    }
}

/// exchange.bind / exchange.unbind share this layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub destination: String,
    pub source: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Bind {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0);
        w.put_short_str(&self.destination)?;
        w.put_short_str(&self.source)?;
        w.put_short_str(&self.routing_key)?;
        w.put_u8(pack_bits(&[self.no_wait]));
        self.arguments.encode(buf)
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        Ok(Self {
            destination: r.read_short_str()?.to_string(),
            source: r.read_short_str()?.to_string(),
            routing_key: r.read_short_str()?.to_string(),
            no_wait: unpack_bits::<1>(r.read_u8()?)[0],
            arguments: FieldTable::decode(r)?,
        })
    }
}
