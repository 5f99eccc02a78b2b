//! Basic-class method arguments (class id 60).

use bytes::BytesMut;

use crate::error::Result;
use crate::methods::{pack_bits, unpack_bits};
use crate::wire::{ByteReader, ByteWriter, FieldTable};

/// basic.qos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qos {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

impl Qos {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u32(self.prefetch_size);
        w.put_u16(self.prefetch_count);
        w.put_u8(pack_bits(&[self.global]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            prefetch_size: r.read_u32()?,
            prefetch_count: r.read_u16()?,
            global: unpack_bits::<1>(r.read_u8()?)[0],
        })
    }
}

/// basic.consume
#[derive(Debug, Clone, PartialEq)]
pub struct Consume {
    pub queue: String,
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Consume {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0); // reserved (ticket)
        w.put_short_str(&self.queue)?;
        w.put_short_str(&self.consumer_tag)?;
        w.put_u8(pack_bits(&[
            self.no_local,
            self.no_ack,
            self.exclusive,
            self.no_wait,
        ]));
        self.arguments.encode(buf)
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        let queue = r.read_short_str()?.to_string();
        let consumer_tag = r.read_short_str()?.to_string();
        let bits = unpack_bits::<4>(r.read_u8()?);
        Ok(Self {
            queue,
            consumer_tag,
            no_local: bits[0],
            no_ack: bits[1],
            exclusive: bits[2],
            no_wait: bits[3],
            arguments: FieldTable::decode(r)?,
        })
    }
}

/// basic.cancel
#[derive(Debug, Clone, PartialEq)]
pub struct Cancel {
    pub consumer_tag: String,
    pub no_wait: bool,
}

impl Cancel {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_short_str(&self.consumer_tag)?;
        w.put_u8(pack_bits(&[self.no_wait]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            consumer_tag: r.read_short_str()?.to_string(),
            no_wait: unpack_bits::<1>(r.read_u8()?)[0],
        })
    }
}

/// basic.publish
#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

impl Publish {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0);
        w.put_short_str(&self.exchange)?;
        w.put_short_str(&self.routing_key)?;
        w.put_u8(pack_bits(&[self.mandatory, self.immediate]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        let exchange = r.read_short_str()?.to_string();
        let routing_key = r.read_short_str()?.to_string();
        let bits = unpack_bits::<2>(r.read_u8()?);
        Ok(Self {
            exchange,
            routing_key,
            mandatory: bits[0],
            immediate: bits[1],
        })
    }
}

/// basic.return - an unroutable mandatory/immediate message coming back.
#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
}

impl Return {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(self.reply_code);
        w.put_short_str(&self.reply_text)?;
        w.put_short_str(&self.exchange)?;
        w.put_short_str(&self.routing_key)?;
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            reply_code: r.read_u16()?,
            reply_text: r.read_short_str()?.to_string(),
            exchange: r.read_short_str()?.to_string(),
            routing_key: r.read_short_str()?.to_string(),
        })
    }
}

/// basic.deliver - push delivery to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Deliver {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

impl Deliver {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_short_str(&self.consumer_tag)?;
        w.put_u64(self.delivery_tag);
        w.put_u8(pack_bits(&[self.redelivered]));
        w.put_short_str(&self.exchange)?;
        w.put_short_str(&self.routing_key)?;
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            consumer_tag: r.read_short_str()?.to_string(),
            delivery_tag: r.read_u64()?,
            redelivered: unpack_bits::<1>(r.read_u8()?)[0],
            exchange: r.read_short_str()?.to_string(),
            routing_key: r.read_short_str()?.to_string(),
        })
    }
}

/// basic.get - synchronous single-message fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Get {
    pub queue: String,
    pub no_ack: bool,
}

impl Get {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(0);
        w.put_short_str(&self.queue)?;
        w.put_u8(pack_bits(&[self.no_ack]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let _ = r.read_u16()?;
        Ok(Self {
            queue: r.read_short_str()?.to_string(),
            no_ack: unpack_bits::<1>(r.read_u8()?)[0],
        })
    }
}

/// basic.get-ok
#[derive(Debug, Clone, PartialEq)]
pub struct GetOk {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub message_count: u32,
}

impl GetOk {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u64(self.delivery_tag);
        w.put_u8(pack_bits(&[self.redelivered]));
        w.put_short_str(&self.exchange)?;
        w.put_short_str(&self.routing_key)?;
        w.put_u32(self.message_count);
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            delivery_tag: r.read_u64()?,
            redelivered: unpack_bits::<1>(r.read_u8()?)[0],
            exchange: r.read_short_str()?.to_string(),
            routing_key: r.read_short_str()?.to_string(),
            message_count: r.read_u32()?,
        })
    }
}

/// basic.ack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub delivery_tag: u64,
    pub multiple: bool,
}

impl Ack {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u64(self.delivery_tag);
        w.put_u8(pack_bits(&[self.multiple]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            delivery_tag: r.read_u64()?,
            multiple: unpack_bits::<1>(r.read_u8()?)[0],
        })
    }
}

/// basic.reject - single-message rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reject {
    pub delivery_tag: u64,
    pub requeue: bool,
}

impl Reject {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u64(self.delivery_tag);
        w.put_u8(pack_bits(&[self.requeue]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            delivery_tag: r.read_u64()?,
            requeue: unpack_bits::<1>(r.read_u8()?)[0],
        })
    }
}

/// basic.nack - multi-message rejection (RabbitMQ extension).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nack {
    pub delivery_tag: u64,
    pub multiple: bool,
    pub requeue: bool,
}

impl Nack {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.put_u64(self.delivery_tag);
        w.put_u8(pack_bits(&[self.multiple, self.requeue]));
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let delivery_tag = r.read_u64()?;
        let bits = unpack_bits::<2>(r.read_u8()?);
        Ok(Self {
            delivery_tag,
            multiple: bits[0],
            requeue: bits[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_bit_packing_lsb_first() {
        let consume = Consume {
            queue: "q".into(),
            consumer_tag: String::new(),
            no_local: true,
            no_ack: false,
            exclusive: true,
            no_wait: false,
            arguments: FieldTable::new(),
        };
        let mut buf = BytesMut::new();
        consume.encode(&mut buf).unwrap();

        // ticket(2) + "q"(2) + ""(1) puts the flag octet at offset 5.
        assert_eq!(buf[5], 0b0000_0101);

        let decoded = Consume::decode(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(decoded, consume);
    }

    #[test]
    fn test_deliver_roundtrip() {
        let deliver = Deliver {
            consumer_tag: "amq.ctag-xyz".into(),
            delivery_tag: 42,
            redelivered: true,
            exchange: "logs".into(),
            routing_key: "error".into(),
        };
        let mut buf = BytesMut::new();
        deliver.encode(&mut buf).unwrap();
        assert_eq!(Deliver::decode(&mut ByteReader::new(&buf)).unwrap(), deliver);
    }

    #[test]
    fn test_nack_flag_octet() {
        let nack = Nack {
            delivery_tag: 7,
            multiple: true,
            requeue: true,
        };
        let mut buf = BytesMut::new();
        nack.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 9);
        assert_eq!(buf[8], 0b0000_0011);
    }

    #[test]
    fn test_qos_layout() {
        let qos = Qos {
            prefetch_size: 0,
            prefetch_count: 10,
            global: false,
        };
        let mut buf = BytesMut::new();
        qos.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 0, 0, 10, 0]);
    }
}
