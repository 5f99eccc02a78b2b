//! Queue-class method arguments (class id 50).

use bytes::BytesMut;

use crate::error::Result;
use crate::methods::{pack_bits, unpack_bits};
use crate::wire::{ByteReader, ByteWriter, FieldTable};

/// queue.declare
#[derive(Debug, Clone, PartialEq)]
pub struct Declare {
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Declare {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0); // reserved (ticket)
        w.put_short_str(&self.queue)?;
        w.put_u8(pack_bits(&[
            self.passive,
            self.durable,
            self.exclusive,
            self.auto_delete,
            self.no_wait,
        ]));
        self.arguments.encode(buf)
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        let queue = r.read_short_str()?.to_string();
        let bits = unpack_bits::<5>(r.read_u8()?);
        Ok(Self {
            queue,
            passive: bits[0],
            durable: bits[1],
            exclusive: bits[2],
            auto_delete: bits[3],
            no_wait: bits[4],
            arguments: FieldTable::decode(r)?,
        })
    }
}

/// queue.declare-ok - carries the (possibly server-assigned) name.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclareOk {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

impl DeclareOk {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_short_str(&self.queue)?;
        w.put_u32(self.message_count);
        w.put_u32(self.consumer_count);
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            queue: r.read_short_str()?.to_string(),
            message_count: r.read_u32()?,
            consumer_count: r.read_u32()?,
        })
    }
}

/// queue.bind
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Bind {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0);
        w.put_short_str(&self.queue)?;
        w.put_short_str(&self.exchange)?;
        w.put_short_str(&self.routing_key)?;
        w.put_u8(pack_bits(&[self.no_wait]));
        self.arguments.encode(buf)
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        Ok(Self {
            queue: r.read_short_str()?.to_string(),
            exchange: r.read_short_str()?.to_string(),
            routing_key: r.read_short_str()?.to_string(),
            no_wait: unpack_bits::<1>(r.read_u8()?)[0],
            arguments: FieldTable::decode(r)?,
        })
    }
}

/// queue.purge
#[derive(Debug, Clone, PartialEq)]
pub struct Purge {
    pub queue: String,
    pub no_wait: bool,
}

impl Purge {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0);
        w.put_short_str(&self.queue)?;
        w.put_u8(pack_bits(&[self.no_wait]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        Ok(Self {
            queue: r.read_short_str()?.to_string(),
            no_wait: unpack_bits::<1>(r.read_u8()?)[0],
        })
    }
}

/// queue.delete
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

impl Delete {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0);
        w.put_short_str(&self.queue)?;
        w.put_u8(pack_bits(&[self.if_unused, self.if_empty, self.no_wait]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        let queue = r.read_short_str()?.to_string();
        let bits = unpack_bits::<3>(r.read_u8()?);
        Ok(Self {
            queue,
            if_unused: bits[0],
            if_empty: bits[1],
            no_wait: bits[2],
        })
    }
}

/// queue.unbind - unlike bind, the protocol defines no no-wait bit here.
#[derive(Debug, Clone, PartialEq)]
pub struct Unbind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

impl Unbind {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0);
        w.put_short_str(&self.queue)?;
        w.put_short_str(&self.exchange)?;
        w.put_short_str(&self.routing_key)?;
        self.arguments.encode(buf)
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        Ok(Self {
            queue: r.read_short_str()?.to_string(),
            exchange: r.read_short_str()?.to_string(),
            routing_key: r.read_short_str()?.to_string(),
            arguments: FieldTable::decode(r)?,
        })
    }
}
