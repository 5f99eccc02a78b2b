//! Method registry - identifies and (de)serializes AMQP methods.
//!
//! Every method frame payload starts with `class-id: u16, method-id: u16`
//! followed by the arguments in declared order. Consecutive boolean
//! arguments pack into shared octets, LSB-first. [`Method`] is the single
//! dispatch point: decoding rejects unknown class/method pairs, encoding
//! writes the ids and arguments back out.

use bytes::{Bytes, BytesMut};

use crate::error::{AmqpError, Result};
use crate::wire::{ByteReader, ByteWriter};

pub mod basic;
pub mod connection;
pub mod exchange;
pub mod queue;

/// Class identifiers.
pub const CLASS_CONNECTION: u16 = 10;
pub const CLASS_CHANNEL: u16 = 20;
pub const CLASS_EXCHANGE: u16 = 40;
pub const CLASS_QUEUE: u16 = 50;
pub const CLASS_BASIC: u16 = 60;
pub const CLASS_TX: u16 = 90;

/// Pack up to eight booleans into one octet, LSB-first.
pub(crate) fn pack_bits(bits: &[bool]) -> u8 {
    debug_assert!(bits.len() <= 8);
    bits.iter()
        .enumerate()
        .fold(0, |acc, (i, &b)| acc | ((b as u8) << i))
}

/// Unpack the first `N` bits of an octet, LSB-first.
pub(crate) fn unpack_bits<const N: usize>(octet: u8) -> [bool; N] {
    let mut out = [false; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = octet & (1 << i) != 0;
    }
    out
}

/// A fully decoded AMQP method.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    ConnectionStart(connection::Start),
    ConnectionStartOk(connection::StartOk),
    ConnectionSecure(connection::Secure),
    ConnectionSecureOk(connection::SecureOk),
    ConnectionTune(connection::Tune),
    ConnectionTuneOk(connection::Tune),
    ConnectionOpen(connection::Open),
    ConnectionOpenOk,
    ConnectionClose(connection::Close),
    ConnectionCloseOk,
    ConnectionBlocked(connection::Blocked),
    ConnectionUnblocked,

    ChannelOpen,
    ChannelOpenOk,
    ChannelFlow { active: bool },
    ChannelFlowOk { active: bool },
    ChannelClose(connection::Close),
    ChannelCloseOk,

    ExchangeDeclare(exchange::Declare),
    ExchangeDeclareOk,
    ExchangeDelete(exchange::Delete),
    ExchangeDeleteOk,
    ExchangeBind(exchange::Bind),
    ExchangeBindOk,
    ExchangeUnbind(exchange::Bind),
    ExchangeUnbindOk,

    QueueDeclare(queue::Declare),
    QueueDeclareOk(queue::DeclareOk),
    QueueBind(queue::Bind),
    QueueBindOk,
    QueuePurge(queue::Purge),
    QueuePurgeOk { message_count: u32 },
    QueueDelete(queue::Delete),
    QueueDeleteOk { message_count: u32 },
    QueueUnbind(queue::Unbind),
    QueueUnbindOk,

    BasicQos(basic::Qos),
    BasicQosOk,
    BasicConsume(basic::Consume),
    BasicConsumeOk { consumer_tag: String },
    BasicCancel(basic::Cancel),
    BasicCancelOk { consumer_tag: String },
    BasicPublish(basic::Publish),
    BasicReturn(basic::Return),
    BasicDeliver(basic::Deliver),
    BasicGet(basic::Get),
    BasicGetOk(basic::GetOk),
    BasicGetEmpty,
    BasicAck(basic::Ack),
    BasicReject(basic::Reject),
    BasicRecover { requeue: bool },
    BasicRecoverOk,
    BasicNack(basic::Nack),

    TxSelect,
    TxSelectOk,
    TxCommit,
    TxCommitOk,
    TxRollback,
    TxRollbackOk,
}

impl Method {
    pub fn class_id(&self) -> u16 {
        use Method::*;
        match self {
            ConnectionStart(_) | ConnectionStartOk(_) | ConnectionSecure(_)
            | ConnectionSecureOk(_) | ConnectionTune(_) | ConnectionTuneOk(_)
            | ConnectionOpen(_) | ConnectionOpenOk | ConnectionClose(_) | ConnectionCloseOk
            | ConnectionBlocked(_) | ConnectionUnblocked => CLASS_CONNECTION,
            ChannelOpen | ChannelOpenOk | ChannelFlow { .. } | ChannelFlowOk { .. }
            | ChannelClose(_) | ChannelCloseOk => CLASS_CHANNEL,
            ExchangeDeclare(_) | ExchangeDeclareOk | ExchangeDelete(_) | ExchangeDeleteOk
            | ExchangeBind(_) | ExchangeBindOk | ExchangeUnbind(_) | ExchangeUnbindOk => {
                CLASS_EXCHANGE
            }
            QueueDeclare(_) | QueueDeclareOk(_) | QueueBind(_) | QueueBindOk | QueuePurge(_)
            | QueuePurgeOk { .. } | QueueDelete(_) | QueueDeleteOk { .. } | QueueUnbind(_)
            | QueueUnbindOk => CLASS_QUEUE,
            BasicQos(_) | BasicQosOk | BasicConsume(_) | BasicConsumeOk { .. }
            | BasicCancel(_) | BasicCancelOk { .. } | BasicPublish(_) | BasicReturn(_)
            | BasicDeliver(_) | BasicGet(_) | BasicGetOk(_) | BasicGetEmpty | BasicAck(_)
            | BasicReject(_) | BasicRecover { .. } | BasicRecoverOk | BasicNack(_) => CLASS_BASIC,
            TxSelect | TxSelectOk | TxCommit | TxCommitOk | TxRollback | TxRollbackOk => CLASS_TX,
        }
    }

    pub fn method_id(&self) -> u16 {
        use Method::*;
        match self {
            ConnectionStart(_) => 10,
            ConnectionStartOk(_) => 11,
            ConnectionSecure(_) => 20,
            ConnectionSecureOk(_) => 21,
            ConnectionTune(_) => 30,
            ConnectionTuneOk(_) => 31,
            ConnectionOpen(_) => 40,
            ConnectionOpenOk => 41,
            ConnectionClose(_) => 50,
            ConnectionCloseOk => 51,
            ConnectionBlocked(_) => 60,
            ConnectionUnblocked => 61,

            ChannelOpen => 10,
            ChannelOpenOk => 11,
            ChannelFlow { .. } => 20,
            ChannelFlowOk { .. } => 21,
            ChannelClose(_) => 40,
            ChannelCloseOk => 41,

            ExchangeDeclare(_) => 10,
            ExchangeDeclareOk => 11,
            ExchangeDelete(_) => 20,
            ExchangeDeleteOk => 21,
            ExchangeBind(_) => 30,
            ExchangeBindOk => 31,
            ExchangeUnbind(_) => 40,
            ExchangeUnbindOk => 51,

            QueueDeclare(_) => 10,
            QueueDeclareOk(_) => 11,
            QueueBind(_) => 20,
            QueueBindOk => 21,
            QueuePurge(_) => 30,
            QueuePurgeOk { .. } => 31,
            QueueDelete(_) => 40,
            QueueDeleteOk { .. } => 41,
            QueueUnbind(_) => 50,
            QueueUnbindOk => 51,

            BasicQos(_) => 10,
            BasicQosOk => 11,
            BasicConsume(_) => 20,
            BasicConsumeOk { .. } => 21,
            BasicCancel(_) => 30,
            BasicCancelOk { .. } => 31,
            BasicPublish(_) => 40,
            BasicReturn(_) => 50,
            BasicDeliver(_) => 60,
            BasicGet(_) => 70,
            BasicGetOk(_) => 71,
            BasicGetEmpty => 72,
            BasicAck(_) => 80,
            BasicReject(_) => 90,
            BasicRecover { .. } => 110,
            BasicRecoverOk => 111,
            BasicNack(_) => 120,

            TxSelect => 10,
            TxSelectOk => 11,
            TxCommit => 20,
            TxCommitOk => 21,
            TxRollback => 30,
            TxRollbackOk => 31,
        }
    }

    /// Dotted protocol name, for logs and error text.
    pub fn name(&self) -> &'static str {
        use Method::*;
        match self {
            ConnectionStart(_) => "connection.start",
            ConnectionStartOk(_) => "connection.start-ok",
            ConnectionSecure(_) => "connection.secure",
            ConnectionSecureOk(_) => "connection.secure-ok",
            ConnectionTune(_) => "connection.tune",
            ConnectionTuneOk(_) => "connection.tune-ok",
            ConnectionOpen(_) => "connection.open",
            ConnectionOpenOk => "connection.open-ok",
            ConnectionClose(_) => "connection.close",
            ConnectionCloseOk => "connection.close-ok",
            ConnectionBlocked(_) => "connection.blocked",
            ConnectionUnblocked => "connection.unblocked",
            ChannelOpen => "channel.open",
            ChannelOpenOk => "channel.open-ok",
            ChannelFlow { .. } => "channel.flow",
            ChannelFlowOk { .. } => "channel.flow-ok",
            ChannelClose(_) => "channel.close",
            ChannelCloseOk => "channel.close-ok",
            ExchangeDeclare(_) => "exchange.declare",
            ExchangeDeclareOk => "exchange.declare-ok",
            ExchangeDelete(_) => "exchange.delete",
            ExchangeDeleteOk => "exchange.delete-ok",
            ExchangeBind(_) => "exchange.bind",
            ExchangeBindOk => "exchange.bind-ok",
            ExchangeUnbind(_) => "exchange.unbind",
            ExchangeUnbindOk => "exchange.unbind-ok",
            QueueDeclare(_) => "queue.declare",
            QueueDeclareOk(_) => "queue.declare-ok",
            QueueBind(_) => "queue.bind",
            QueueBindOk => "queue.bind-ok",
            QueuePurge(_) => "queue.purge",
            QueuePurgeOk { .. } => "queue.purge-ok",
            QueueDelete(_) => "queue.delete",
            QueueDeleteOk { .. } => "queue.delete-ok",
            QueueUnbind(_) => "queue.unbind",
            QueueUnbindOk => "queue.unbind-ok",
            BasicQos(_) => "basic.qos",
            BasicQosOk => "basic.qos-ok",
            BasicConsume(_) => "basic.consume",
            BasicConsumeOk { .. } => "basic.consume-ok",
            BasicCancel(_) => "basic.cancel",
            BasicCancelOk { .. } => "basic.cancel-ok",
            BasicPublish(_) => "basic.publish",
            BasicReturn(_) => "basic.return",
            BasicDeliver(_) => "basic.deliver",
            BasicGet(_) => "basic.get",
            BasicGetOk(_) => "basic.get-ok",
            BasicGetEmpty => "basic.get-empty",
            BasicAck(_) => "basic.ack",
            BasicReject(_) => "basic.reject",
            BasicRecover { .. } => "basic.recover",
            BasicRecoverOk => "basic.recover-ok",
            BasicNack(_) => "basic.nack",
            TxSelect => "tx.select",
            TxSelectOk => "tx.select-ok",
            TxCommit => "tx.commit",
            TxCommitOk => "tx.commit-ok",
            TxRollback => "tx.rollback",
            TxRollbackOk => "tx.rollback-ok",
        }
    }

    /// Whether this method, sent as a request, expects a reply method.
    ///
    /// A `no-wait` flag on the concrete arguments suppresses the reply even
    /// when this returns true; callers check that separately.
    pub fn synchronous(&self) -> bool {
        use Method::*;
        matches!(
            self,
            ConnectionOpen(_)
                | ConnectionClose(_)
                | ChannelOpen
                | ChannelFlow { .. }
                | ChannelClose(_)
                | ExchangeDeclare(_)
                | ExchangeDelete(_)
                | ExchangeBind(_)
                | ExchangeUnbind(_)
                | QueueDeclare(_)
                | QueueBind(_)
                | QueuePurge(_)
                | QueueDelete(_)
                | QueueUnbind(_)
                | BasicQos(_)
                | BasicConsume(_)
                | BasicCancel(_)
                | BasicGet(_)
                | BasicRecover { .. }
                | TxSelect
                | TxCommit
                | TxRollback
        )
    }

    /// Whether this method is the reply that completes `request`.
    ///
    /// Covers both directions: client round-trips (queue.declare ->
    /// declare-ok) and server-initiated exchanges the client must answer
    /// (connection.start -> start-ok). basic.get is special-cased: either
    /// get-ok or get-empty completes it.
    pub fn replies(&self, request: &Method) -> bool {
        use Method::*;
        matches!(
            (self, request),
            (ConnectionStartOk(_), ConnectionStart(_))
                | (ConnectionSecureOk(_), ConnectionSecure(_))
                | (ConnectionTuneOk(_), ConnectionTune(_))
                | (ConnectionOpenOk, ConnectionOpen(_))
                | (ConnectionCloseOk, ConnectionClose(_))
                | (ChannelOpenOk, ChannelOpen)
                | (ChannelFlowOk { .. }, ChannelFlow { .. })
                | (ChannelCloseOk, ChannelClose(_))
                | (ExchangeDeclareOk, ExchangeDeclare(_))
                | (ExchangeDeleteOk, ExchangeDelete(_))
                | (ExchangeBindOk, ExchangeBind(_))
                | (ExchangeUnbindOk, ExchangeUnbind(_))
                | (QueueDeclareOk(_), QueueDeclare(_))
                | (QueueBindOk, QueueBind(_))
                | (QueuePurgeOk { .. }, QueuePurge(_))
                | (QueueDeleteOk { .. }, QueueDelete(_))
                | (QueueUnbindOk, QueueUnbind(_))
                | (BasicQosOk, BasicQos(_))
                | (BasicConsumeOk { .. }, BasicConsume(_))
                | (BasicCancelOk { .. }, BasicCancel(_))
                | (BasicGetOk(_), BasicGet(_))
                | (BasicGetEmpty, BasicGet(_))
                | (BasicRecoverOk, BasicRecover { .. })
                | (TxSelectOk, TxSelect)
                | (TxCommitOk, TxCommit)
                | (TxRollbackOk, TxRollback)
        )
    }

    /// Encode as a METHOD frame payload.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(32);
        {
            let mut w = ByteWriter::new(&mut buf);
            w.put_u16(self.class_id());
            w.put_u16(self.method_id());
        }
        use Method::*;
        match self {
            ConnectionStart(args) => args.encode(&mut buf)?,
            ConnectionStartOk(args) => args.encode(&mut buf)?,
            ConnectionSecure(args) => args.encode(&mut buf)?,
            ConnectionSecureOk(args) => args.encode(&mut buf)?,
            ConnectionTune(args) | ConnectionTuneOk(args) => args.encode(&mut buf)?,
            ConnectionOpen(args) => args.encode(&mut buf)?,
            ConnectionOpenOk => ByteWriter::new(&mut buf).put_short_str("")?,
            ConnectionClose(args) | ChannelClose(args) => args.encode(&mut buf)?,
            ConnectionBlocked(args) => args.encode(&mut buf)?,
            ChannelOpen => ByteWriter::new(&mut buf).put_short_str("")?,
            ChannelOpenOk => ByteWriter::new(&mut buf).put_long_bytes(b""),
            ChannelFlow { active } | ChannelFlowOk { active } => {
                ByteWriter::new(&mut buf).put_u8(pack_bits(&[*active]))
            }
            ExchangeDeclare(args) => args.encode(&mut buf)?,
            ExchangeDelete(args) => args.encode(&mut buf)?,
            ExchangeBind(args) | ExchangeUnbind(args) => args.encode(&mut buf)?,
            QueueDeclare(args) => args.encode(&mut buf)?,
            QueueDeclareOk(args) => args.encode(&mut buf)?,
            QueueBind(args) => args.encode(&mut buf)?,
            QueuePurge(args) => args.encode(&mut buf)?,
            QueuePurgeOk { message_count } | QueueDeleteOk { message_count } => {
                ByteWriter::new(&mut buf).put_u32(*message_count)
            }
            QueueDelete(args) => args.encode(&mut buf)?,
            QueueUnbind(args) => args.encode(&mut buf)?,
            BasicQos(args) => args.encode(&mut buf)?,
            BasicConsume(args) => args.encode(&mut buf)?,
            BasicConsumeOk { consumer_tag } | BasicCancelOk { consumer_tag } => {
                ByteWriter::new(&mut buf).put_short_str(consumer_tag)?
            }
            BasicCancel(args) => args.encode(&mut buf)?,
            BasicPublish(args) => args.encode(&mut buf)?,
            BasicReturn(args) => args.encode(&mut buf)?,
            BasicDeliver(args) => args.encode(&mut buf)?,
            BasicGet(args) => args.encode(&mut buf)?,
            BasicGetOk(args) => args.encode(&mut buf)?,
            BasicGetEmpty => ByteWriter::new(&mut buf).put_short_str("")?,
            BasicAck(args) => args.encode(&mut buf)?,
            BasicReject(args) => args.encode(&mut buf)?,
            BasicRecover { requeue } => ByteWriter::new(&mut buf).put_u8(pack_bits(&[*requeue])),
            BasicNack(args) => args.encode(&mut buf)?,
            ConnectionCloseOk | ConnectionUnblocked | ChannelCloseOk | ExchangeDeclareOk
            | ExchangeDeleteOk | ExchangeBindOk | ExchangeUnbindOk | QueueBindOk
            | QueueUnbindOk | BasicQosOk | BasicRecoverOk | TxSelect | TxSelectOk | TxCommit
            | TxCommitOk | TxRollback | TxRollbackOk => {}
        }
        Ok(buf.freeze())
    }

    /// Decode a METHOD frame payload.
    pub fn decode(payload: &[u8]) -> Result<Method> {
        let mut r = ByteReader::new(payload);
        let class_id = r.read_u16()?;
        let method_id = r.read_u16()?;
        let r = &mut r;

        use Method::*;
        Ok(match (class_id, method_id) {
            (CLASS_CONNECTION, 10) => ConnectionStart(connection::Start::decode(r)?),
            (CLASS_CONNECTION, 11) => ConnectionStartOk(connection::StartOk::decode(r)?),
            (CLASS_CONNECTION, 20) => ConnectionSecure(connection::Secure::decode(r)?),
            (CLASS_CONNECTION, 21) => ConnectionSecureOk(connection::SecureOk::decode(r)?),
            (CLASS_CONNECTION, 30) => ConnectionTune(connection::Tune::decode(r)?),
            (CLASS_CONNECTION, 31) => ConnectionTuneOk(connection::Tune::decode(r)?),
            (CLASS_CONNECTION, 40) => ConnectionOpen(connection::Open::decode(r)?),
            (CLASS_CONNECTION, 41) => {
                let _ = r.read_short_str()?;
                ConnectionOpenOk
            }
            (CLASS_CONNECTION, 50) => ConnectionClose(connection::Close::decode(r)?),
            (CLASS_CONNECTION, 51) => ConnectionCloseOk,
            (CLASS_CONNECTION, 60) => ConnectionBlocked(connection::Blocked::decode(r)?),
            (CLASS_CONNECTION, 61) => ConnectionUnblocked,

            (CLASS_CHANNEL, 10) => {
                let _ = r.read_short_str()?;
                ChannelOpen
            }
            (CLASS_CHANNEL, 11) => {
                let _ = r.read_long_bytes()?;
                ChannelOpenOk
            }
            (CLASS_CHANNEL, 20) => ChannelFlow {
                active: unpack_bits::<1>(r.read_u8()?)[0],
            },
            (CLASS_CHANNEL, 21) => ChannelFlowOk {
                active: unpack_bits::<1>(r.read_u8()?)[0],
            },
            (CLASS_CHANNEL, 40) => ChannelClose(connection::Close::decode(r)?),
            (CLASS_CHANNEL, 41) => ChannelCloseOk,

            (CLASS_EXCHANGE, 10) => ExchangeDeclare(exchange::Declare::decode(r)?),
            (CLASS_EXCHANGE, 11) => ExchangeDeclareOk,
            (CLASS_EXCHANGE, 20) => ExchangeDelete(exchange::Delete::decode(r)?),
            (CLASS_EXCHANGE, 21) => ExchangeDeleteOk,
            (CLASS_EXCHANGE, 30) => ExchangeBind(exchange::Bind::decode(r)?),
            (CLASS_EXCHANGE, 31) => ExchangeBindOk,
            (CLASS_EXCHANGE, 40) => ExchangeUnbind(exchange::Bind::decode(r)?),
            (CLASS_EXCHANGE, 51) => ExchangeUnbindOk,

            (CLASS_QUEUE, 10) => QueueDeclare(queue::Declare::decode(r)?),
            (CLASS_QUEUE, 11) => QueueDeclareOk(queue::DeclareOk::decode(r)?),
            (CLASS_QUEUE, 20) => QueueBind(queue::Bind::decode(r)?),
            (CLASS_QUEUE, 21) => QueueBindOk,
            (CLASS_QUEUE, 30) => QueuePurge(queue::Purge::decode(r)?),
            (CLASS_QUEUE, 31) => QueuePurgeOk {
                message_count: r.read_u32()?,
            },
            (CLASS_QUEUE, 40) => QueueDelete(queue::Delete::decode(r)?),
            (CLASS_QUEUE, 41) => QueueDeleteOk {
                message_count: r.read_u32()?,
            },
            (CLASS_QUEUE, 50) => QueueUnbind(queue::Unbind::decode(r)?),
            (CLASS_QUEUE, 51) => QueueUnbindOk,

            (CLASS_BASIC, 10) => BasicQos(basic::Qos::decode(r)?),
            (CLASS_BASIC, 11) => BasicQosOk,
            (CLASS_BASIC, 20) => BasicConsume(basic::Consume::decode(r)?),
            (CLASS_BASIC, 21) => BasicConsumeOk {
                consumer_tag: r.read_short_str()?.to_string(),
            },
            (CLASS_BASIC, 30) => BasicCancel(basic::Cancel::decode(r)?),
            (CLASS_BASIC, 31) => BasicCancelOk {
                consumer_tag: r.read_short_str()?.to_string(),
            },
            (CLASS_BASIC, 40) => BasicPublish(basic::Publish::decode(r)?),
            (CLASS_BASIC, 50) => BasicReturn(basic::Return::decode(r)?),
            (CLASS_BASIC, 60) => BasicDeliver(basic::Deliver::decode(r)?),
            (CLASS_BASIC, 70) => BasicGet(basic::Get::decode(r)?),
            (CLASS_BASIC, 71) => BasicGetOk(basic::GetOk::decode(r)?),
            (CLASS_BASIC, 72) => {
                let _ = r.read_short_str()?;
                BasicGetEmpty
            }
            (CLASS_BASIC, 80) => BasicAck(basic::Ack::decode(r)?),
            (CLASS_BASIC, 90) => BasicReject(basic::Reject::decode(r)?),
            (CLASS_BASIC, 110) => BasicRecover {
                requeue: unpack_bits::<1>(r.read_u8()?)[0],
            },
            (CLASS_BASIC, 111) => BasicRecoverOk,
            (CLASS_BASIC, 120) => BasicNack(basic::Nack::decode(r)?),

            (CLASS_TX, 10) => TxSelect,
            (CLASS_TX, 11) => TxSelectOk,
            (CLASS_TX, 20) => TxCommit,
            (CLASS_TX, 21) => TxCommitOk,
            (CLASS_TX, 30) => TxRollback,
            (CLASS_TX, 31) => TxRollbackOk,

            (class, method) => {
                return Err(AmqpError::UnexpectedFrame(format!(
                    "unknown method {}:{}",
                    class, method
                )))
            }
        })
    }
}
