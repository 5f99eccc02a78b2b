//! Tagged field values and field tables.
//!
//! Field tables carry the free-form metadata of the protocol: queue and
//! exchange arguments, message headers, client/server capability maps.
//! Each value is prefixed with a one-byte type code on the wire; tables
//! preserve insertion order end to end.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{AmqpError, Result};
use crate::wire::codec::{ByteReader, ByteWriter};

/// Exact decimal: `value / 10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    pub scale: u8,
    pub value: i32,
}

impl Decimal {
    pub fn new(scale: u8, value: i32) -> Self {
        Self { scale, value }
    }
}

/// A single field value with its wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    ShortStr(String),
    LongStr(Bytes),
    /// Seconds since the Unix epoch.
    Timestamp(u64),
    Array(Vec<FieldValue>),
    Table(FieldTable),
    Void,
}

impl FieldValue {
    /// The one-byte wire type code.
    pub fn type_code(&self) -> u8 {
        match self {
            FieldValue::Bool(_) => b't',
            FieldValue::I8(_) => b'b',
            FieldValue::U8(_) => b'B',
            FieldValue::I16(_) => b'U',
            FieldValue::U16(_) => b'u',
            FieldValue::I32(_) => b'I',
            FieldValue::U32(_) => b'i',
            FieldValue::I64(_) => b'L',
            FieldValue::U64(_) => b'l',
            FieldValue::F32(_) => b'f',
            FieldValue::F64(_) => b'd',
            FieldValue::Decimal(_) => b'D',
            FieldValue::ShortStr(_) => b's',
            FieldValue::LongStr(_) => b'S',
            FieldValue::Timestamp(_) => b'T',
            FieldValue::Array(_) => b'A',
            FieldValue::Table(_) => b'F',
            FieldValue::Void => b'V',
        }
    }

    /// Encode type code and payload.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.type_code());
        match self {
            FieldValue::Bool(v) => buf.put_u8(*v as u8),
            FieldValue::I8(v) => buf.put_i8(*v),
            FieldValue::U8(v) => buf.put_u8(*v),
            FieldValue::I16(v) => buf.put_i16(*v),
            FieldValue::U16(v) => buf.put_u16(*v),
            FieldValue::I32(v) => buf.put_i32(*v),
            FieldValue::U32(v) => buf.put_u32(*v),
            FieldValue::I64(v) => buf.put_i64(*v),
            FieldValue::U64(v) => buf.put_u64(*v),
            FieldValue::F32(v) => buf.put_u32(v.to_bits()),
            FieldValue::F64(v) => buf.put_u64(v.to_bits()),
            FieldValue::Decimal(d) => {
                buf.put_u8(d.scale);
                buf.put_i32(d.value);
            }
            FieldValue::ShortStr(s) => ByteWriter::new(buf).put_short_str(s)?,
            FieldValue::LongStr(s) => ByteWriter::new(buf).put_long_bytes(s),
            FieldValue::Timestamp(v) => buf.put_u64(*v),
            FieldValue::Array(values) => {
                // u32 byte-length prefix, then each value with its code.
                let mut inner = BytesMut::new();
                for v in values {
                    v.encode(&mut inner)?;
                }
                buf.put_u32(inner.len() as u32);
                buf.put_slice(&inner);
            }
            FieldValue::Table(t) => t.encode(buf)?,
            FieldValue::Void => {}
        }
        Ok(())
    }

    /// Decode one value (type code first) from the reader.
    pub fn decode(r: &mut ByteReader<'_>) -> Result<FieldValue> {
        let code = r.read_u8()?;
        Ok(match code {
            b't' => FieldValue::Bool(r.read_u8()? != 0),
            b'b' => FieldValue::I8(r.read_i8()?),
            b'B' => FieldValue::U8(r.read_u8()?),
            b'U' => FieldValue::I16(r.read_i16()?),
            b'u' => FieldValue::U16(r.read_u16()?),
            b'I' => FieldValue::I32(r.read_i32()?),
            b'i' => FieldValue::U32(r.read_u32()?),
            b'L' => FieldValue::I64(r.read_i64()?),
            b'l' => FieldValue::U64(r.read_u64()?),
            b'f' => FieldValue::F32(r.read_f32()?),
            b'd' => FieldValue::F64(r.read_f64()?),
            b'D' => FieldValue::Decimal(Decimal {
                scale: r.read_u8()?,
                value: r.read_i32()?,
            }),
            b's' => FieldValue::ShortStr(r.read_short_str()?.to_string()),
            b'S' => FieldValue::LongStr(Bytes::copy_from_slice(r.read_long_bytes()?)),
            b'T' => FieldValue::Timestamp(r.read_u64()?),
            b'A' => {
                let len = r.read_u32()? as usize;
                let slice = r.read_bytes(len)?;
                let mut inner = ByteReader::new(slice);
                let mut values = Vec::new();
                while inner.remaining() > 0 {
                    values.push(FieldValue::decode(&mut inner)?);
                }
                FieldValue::Array(values)
            }
            b'F' => FieldValue::Table(FieldTable::decode(r)?),
            b'V' => FieldValue::Void,
            other => {
                return Err(AmqpError::Framing(format!(
                    "unknown field type code 0x{:02x}",
                    other
                )))
            }
        })
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::I32(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U32(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::LongStr(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::LongStr(Bytes::from(v.into_bytes()))
    }
}

impl From<FieldTable> for FieldValue {
    fn from(v: FieldTable) -> Self {
        FieldValue::Table(v)
    }
}

/// Insertion-ordered mapping from short-string keys to field values.
///
/// Keys are not deduplicated by the codec; [`FieldTable::insert`] replaces
/// an existing key in place so well-behaved callers never produce
/// duplicates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldTable {
    entries: Vec<(String, FieldValue)>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, keeping the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Builder-style insert for table literals.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Encode as a u32 length prefix followed by the entries.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let len_at = buf.len();
        buf.put_u32(0);
        self.encode_entries(buf)?;
        let table_len = (buf.len() - len_at - 4) as u32;
        buf[len_at..len_at + 4].copy_from_slice(&table_len.to_be_bytes());
        Ok(())
    }

    /// Encode the entries without the length prefix (the AMQPLAIN
    /// authentication response uses this bare form).
    pub fn encode_entries(&self, buf: &mut BytesMut) -> Result<()> {
        for (key, value) in &self.entries {
            ByteWriter::new(buf).put_short_str(key)?;
            value.encode(buf)?;
        }
        Ok(())
    }

    /// Decode a length-prefixed table. The announced length must land
    /// exactly on an entry boundary.
    pub fn decode(r: &mut ByteReader<'_>) -> Result<FieldTable> {
        let len = r.read_u32()? as usize;
        let slice = r.read_bytes(len)?;
        let mut inner = ByteReader::new(slice);
        let mut entries = Vec::new();
        while inner.remaining() > 0 {
            let key = inner.read_short_str()?.to_string();
            let value = FieldValue::decode(&mut inner)?;
            entries.push((key, value));
        }
        Ok(FieldTable { entries })
    }
}

impl<'a> IntoIterator for &'a FieldTable {
    type Item = &'a (String, FieldValue);
    type IntoIter = std::slice::Iter<'a, (String, FieldValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(table: &FieldTable) -> FieldTable {
        let mut buf = BytesMut::new();
        table.encode(&mut buf).unwrap();
        let mut r = ByteReader::new(&buf);
        let decoded = FieldTable::decode(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
        decoded
    }

    #[test]
    fn test_empty_table_is_four_zero_bytes() {
        let mut buf = BytesMut::new();
        FieldTable::new().encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_table_roundtrip_preserves_order() {
        let table = FieldTable::new()
            .with("x-message-ttl", 60000i32)
            .with("x-dead-letter-exchange", "dlx")
            .with("x-max-priority", FieldValue::U8(9))
            .with("alternate", FieldValue::Void);

        let decoded = roundtrip(&table);
        let keys: Vec<&str> = decoded.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                "x-message-ttl",
                "x-dead-letter-exchange",
                "x-max-priority",
                "alternate"
            ]
        );
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut table = FieldTable::new();
        table.insert("a", 1i32);
        table.insert("b", 2i32);
        table.insert("a", 3i32);

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a"), Some(&FieldValue::I32(3)));
        // "a" keeps its original position ahead of "b".
        assert_eq!(table.iter().next().unwrap().0, "a");
    }

    #[test]
    fn test_nested_table_and_array() {
        let capabilities = FieldTable::new()
            .with("basic.nack", true)
            .with("consumer_cancel_notify", true);
        let table = FieldTable::new()
            .with("capabilities", capabilities.clone())
            .with(
                "mixed",
                FieldValue::Array(vec![
                    FieldValue::I32(-7),
                    FieldValue::ShortStr("s".into()),
                    FieldValue::Bool(true),
                ]),
            );

        let decoded = roundtrip(&table);
        assert_eq!(
            decoded.get("capabilities"),
            Some(&FieldValue::Table(capabilities))
        );
        match decoded.get("mixed") {
            Some(FieldValue::Array(values)) => assert_eq!(values.len(), 3),
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_decimal_and_timestamp_wire_bytes() {
        let mut buf = BytesMut::new();
        FieldValue::Decimal(Decimal::new(2, 1999))
            .encode(&mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[b'D', 2, 0x00, 0x00, 0x07, 0xCF]);

        let mut buf = BytesMut::new();
        FieldValue::Timestamp(1_700_000_000)
            .encode(&mut buf)
            .unwrap();
        assert_eq!(buf[0], b'T');
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn test_unknown_type_code_rejected() {
        // key "k" + bogus type code 'Z'
        let raw = [0u8, 0, 0, 4, 1, b'k', b'Z', 0];
        let mut r = ByteReader::new(&raw);
        assert!(matches!(
            FieldTable::decode(&mut r),
            Err(AmqpError::Framing(_))
        ));
    }

    #[test]
    fn test_truncated_table_rejected() {
        // Announces 10 bytes but carries 2.
        let raw = [0u8, 0, 0, 10, 1, b'k'];
        let mut r = ByteReader::new(&raw);
        assert!(matches!(
            FieldTable::decode(&mut r),
            Err(AmqpError::Truncated)
        ));
    }
}
