//! Per-channel protocol state and the channel operations catalog.
//!
//! The engine owns one [`ChannelCore`] per channel id: protocol status,
//! the pending-reply FIFO, the consumer table, and the in-progress
//! message assembly. Users hold a [`Channel`] handle - channel id plus a
//! borrow of the connection - and every operation maps onto frames
//! emitted through the connection's outbound buffer.

use std::collections::{HashMap, VecDeque};

use bytes::BytesMut;

use crate::connection::{Connection, Outbound};
use crate::consumer::ConsumerSink;
use crate::deferred::{
    Deferred, DeferredCancel, DeferredConsumer, DeferredDelete, DeferredGet, DeferredQueue,
    Pending, ReplyKind,
};
use crate::error::{AmqpError, Result};
use crate::message::{
    ContentHeader, Delivery, Envelope, GetMessage, Message, Properties, ReturnedMessage,
};
use crate::methods::{basic, connection as connection_args, exchange, queue, Method, CLASS_BASIC};

/// Operation flags, combined with bitwise or.
///
/// Each operation documents which flags it recognizes; unrecognized bits
/// are ignored.
pub mod flags {
    /// Survives a broker restart (exchange.declare, queue.declare).
    pub const DURABLE: u32 = 0x1;
    /// Removed when the last binding/consumer goes away.
    pub const AUTODELETE: u32 = 0x2;
    /// Only check for existence, never create.
    pub const PASSIVE: u32 = 0x4;
    /// Exchange cannot be published to directly (exchange.declare).
    pub const INTERNAL: u32 = 0x8;
    /// Do not wait for the confirmation reply.
    pub const NOWAIT: u32 = 0x10;
    /// Queue is private to this connection (queue.declare) or consumer
    /// access is exclusive (basic.consume).
    pub const EXCLUSIVE: u32 = 0x20;
    /// Only delete when unused (exchange.delete, queue.delete).
    pub const IFUNUSED: u32 = 0x40;
    /// Only delete when empty (queue.delete).
    pub const IFEMPTY: u32 = 0x80;
    /// Do not deliver messages published on this same connection
    /// (basic.consume).
    pub const NOLOCAL: u32 = 0x100;
    /// Messages need no acknowledgement (basic.consume, basic.get).
    pub const NOACK: u32 = 0x200;
    /// Apply to all messages up to and including the tag (basic.ack,
    /// basic.reject).
    pub const MULTIPLE: u32 = 0x400;
    /// Put rejected messages back in the queue (basic.reject,
    /// basic.recover).
    pub const REQUEUE: u32 = 0x800;
    /// Return the message when it cannot be routed (publish).
    pub const MANDATORY: u32 = 0x1000;
    /// Return the message when it cannot be delivered at once (publish).
    pub const IMMEDIATE: u32 = 0x2000;
}

fn has(word: u32, flag: u32) -> bool {
    word & flag != 0
}

/// The built-in exchange types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeType {
    #[default]
    Fanout,
    Direct,
    Topic,
    Headers,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Fanout => "fanout",
            ExchangeType::Direct => "direct",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
        }
    }
}

/// Channel lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelStatus {
    /// channel.open emitted (or queued), waiting for open-ok.
    WaitingOpenOk,
    Ready,
    /// Inbound deliveries stopped by channel.flow.
    Paused,
    /// tx.select confirmed; commit/rollback keep this state.
    InTransaction,
    /// channel.close emitted, waiting for close-ok.
    Closing,
    Closed,
}

/// Message-assembly sub-state: which inbound method opened the content
/// sequence.
enum AssemblyRoute {
    Deliver(basic::Deliver),
    Return(basic::Return),
    Get {
        args: basic::GetOk,
        pending: Pending,
    },
}

/// An inbound message being pieced together from HEADER and BODY frames.
///
/// At most one assembly exists per channel at any time.
struct Assembly {
    route: AssemblyRoute,
    /// None until the HEADER frame arrives.
    properties: Option<Properties>,
    remaining: u64,
    accum: BytesMut,
}

/// Engine-owned state for one channel.
pub(crate) struct ChannelCore {
    id: u16,
    status: ChannelStatus,
    pending: VecDeque<Pending>,
    consumers: HashMap<String, ConsumerSink>,
    assembly: Option<Assembly>,
    on_ready: Option<Box<dyn FnOnce()>>,
    on_error: Option<Box<dyn FnOnce(&AmqpError)>>,
    on_returned: Option<Box<dyn FnMut(ReturnedMessage)>>,
    error: Option<AmqpError>,
}

impl ChannelCore {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            status: ChannelStatus::WaitingOpenOk,
            pending: VecDeque::new(),
            consumers: HashMap::new(),
            assembly: None,
            on_ready: None,
            on_error: None,
            on_returned: None,
            error: None,
        }
    }

    /// Ready for user operations (open-ok received, not closing).
    pub fn usable(&self) -> bool {
        matches!(
            self.status,
            ChannelStatus::Ready | ChannelStatus::Paused | ChannelStatus::InTransaction
        )
    }

    /// Closed with all deferreds settled: the id may be reallocated.
    pub fn reusable(&self) -> bool {
        self.status == ChannelStatus::Closed && self.pending.is_empty()
    }

    pub fn mark_closing(&mut self) {
        if self.status != ChannelStatus::Closed {
            self.status = ChannelStatus::Closing;
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.status {
            ChannelStatus::Ready | ChannelStatus::Paused | ChannelStatus::InTransaction => Ok(()),
            ChannelStatus::WaitingOpenOk => Err(AmqpError::NotConnected),
            ChannelStatus::Closing | ChannelStatus::Closed => {
                Err(self.error.clone().unwrap_or(AmqpError::ChannelClosed))
            }
        }
    }

    pub(crate) fn push_pending(&mut self, pending: Pending) -> &mut Pending {
        self.pending.push_back(pending);
        self.pending.back_mut().expect("entry just pushed")
    }

    /// Pop the FIFO head when it expects `kind`.
    fn pop_matching(&mut self, kind: ReplyKind) -> Option<Pending> {
        if self.pending.front().map(|p| p.reply == kind)? {
            self.pending.pop_front()
        } else {
            None
        }
    }

    /// Fail every pending deferred (and a get assembly, if any) with `err`.
    pub fn fail_all(&mut self, err: &AmqpError) {
        for pending in self.pending.drain(..) {
            pending.fail(err);
        }
        if let Some(assembly) = self.assembly.take() {
            if let AssemblyRoute::Get { pending, .. } = assembly.route {
                pending.fail(err);
            }
        }
        self.consumers.clear();
    }

    fn fire_error(&mut self, err: &AmqpError) {
        if let Some(callback) = self.on_error.take() {
            callback(err);
        }
    }

    /// Local protocol violation: close the channel with `reply_code` and
    /// fail everything pending.
    fn fault(&mut self, out: &mut Outbound, reply_code: u16, text: &str) -> Result<()> {
        tracing::error!(channel = self.id, code = reply_code, text, "channel fault");
        let err = AmqpError::UnexpectedFrame(text.to_string());
        if self.status != ChannelStatus::Closed {
            out.send_method(
                self.id,
                &Method::ChannelClose(connection_args::Close {
                    reply_code,
                    reply_text: text.to_string(),
                    class_id: 0,
                    method_id: 0,
                }),
            )?;
            self.status = ChannelStatus::Closing;
        }
        self.error = Some(err.clone());
        self.fail_all(&err);
        self.fire_error(&err);
        Ok(())
    }

    /// Broker-initiated channel.close: ack it, fan the exception out to
    /// every pending deferred, then transition to Closed.
    fn broker_close(&mut self, out: &mut Outbound, args: connection_args::Close) -> Result<()> {
        tracing::debug!(
            channel = self.id,
            code = args.reply_code,
            text = %args.reply_text,
            "broker closed channel"
        );
        out.send_method(self.id, &Method::ChannelCloseOk)?;
        let err = AmqpError::ChannelException {
            code: args.reply_code,
            text: args.reply_text,
        };
        self.error = Some(err.clone());
        self.fail_all(&err);
        self.status = ChannelStatus::Closed;
        self.fire_error(&err);
        Ok(())
    }

    /// Apply an inbound METHOD frame.
    pub fn apply_method(&mut self, method: Method, out: &mut Outbound) -> Result<()> {
        // A HEADER (then BODY) must follow deliver/return/get-ok; any
        // method in between is a sequencing violation.
        if self.assembly.is_some() {
            return self.fault(out, 505, "UNEXPECTED_FRAME - method during content assembly");
        }

        match method {
            Method::ChannelOpenOk => match self.pop_matching(ReplyKind::ChannelOpenOk) {
                Some(pending) => {
                    self.status = ChannelStatus::Ready;
                    tracing::debug!(channel = self.id, "channel open");
                    pending.succeed_plain();
                    if let Some(callback) = self.on_ready.take() {
                        callback();
                    }
                }
                None => return self.fault(out, 505, "unexpected channel.open-ok"),
            },

            Method::ChannelFlowOk { active } => match self.pop_matching(ReplyKind::ChannelFlowOk) {
                Some(pending) => {
                    self.status = if active {
                        ChannelStatus::Ready
                    } else {
                        ChannelStatus::Paused
                    };
                    pending.succeed_plain();
                }
                None => return self.fault(out, 505, "unexpected channel.flow-ok"),
            },

            // Broker-initiated flow control; ack with the same state.
            Method::ChannelFlow { active } => {
                out.send_method(self.id, &Method::ChannelFlowOk { active })?;
                if self.usable() {
                    self.status = if active {
                        ChannelStatus::Ready
                    } else {
                        ChannelStatus::Paused
                    };
                }
            }

            Method::ChannelClose(args) => return self.broker_close(out, args),

            Method::ChannelCloseOk => {
                if let Some(pending) = self.pop_matching(ReplyKind::ChannelCloseOk) {
                    pending.succeed_plain();
                }
                let err = AmqpError::ChannelClosed;
                self.fail_all(&err);
                self.status = ChannelStatus::Closed;
                tracing::debug!(channel = self.id, "channel closed");
            }

            Method::TxSelectOk => match self.pop_matching(ReplyKind::TxSelectOk) {
                Some(pending) => {
                    self.status = ChannelStatus::InTransaction;
                    pending.succeed_plain();
                }
                None => return self.fault(out, 505, "unexpected tx.select-ok"),
            },

            Method::TxCommitOk => match self.pop_matching(ReplyKind::TxCommitOk) {
                Some(pending) => pending.succeed_plain(),
                None => return self.fault(out, 505, "unexpected tx.commit-ok"),
            },

            Method::TxRollbackOk => match self.pop_matching(ReplyKind::TxRollbackOk) {
                Some(pending) => pending.succeed_plain(),
                None => return self.fault(out, 505, "unexpected tx.rollback-ok"),
            },

            Method::ExchangeDeclareOk => {
                return self.resolve_plain(ReplyKind::ExchangeDeclareOk, "exchange.declare-ok", out)
            }
            Method::ExchangeDeleteOk => {
                return self.resolve_plain(ReplyKind::ExchangeDeleteOk, "exchange.delete-ok", out)
            }
            Method::ExchangeBindOk => {
                return self.resolve_plain(ReplyKind::ExchangeBindOk, "exchange.bind-ok", out)
            }
            Method::ExchangeUnbindOk => {
                return self.resolve_plain(ReplyKind::ExchangeUnbindOk, "exchange.unbind-ok", out)
            }
            Method::QueueBindOk => {
                return self.resolve_plain(ReplyKind::QueueBindOk, "queue.bind-ok", out)
            }
            Method::QueueUnbindOk => {
                return self.resolve_plain(ReplyKind::QueueUnbindOk, "queue.unbind-ok", out)
            }
            Method::BasicQosOk => {
                return self.resolve_plain(ReplyKind::BasicQosOk, "basic.qos-ok", out)
            }
            Method::BasicRecoverOk => {
                return self.resolve_plain(ReplyKind::BasicRecoverOk, "basic.recover-ok", out)
            }

            Method::QueueDeclareOk(args) => match self.pop_matching(ReplyKind::QueueDeclareOk) {
                Some(pending) => {
                    pending.succeed_queue(&args.queue, args.message_count, args.consumer_count)
                }
                None => return self.fault(out, 505, "unexpected queue.declare-ok"),
            },

            Method::QueuePurgeOk { message_count } => {
                match self.pop_matching(ReplyKind::QueuePurgeOk) {
                    Some(pending) => pending.succeed_count(message_count),
                    None => return self.fault(out, 505, "unexpected queue.purge-ok"),
                }
            }

            Method::QueueDeleteOk { message_count } => {
                match self.pop_matching(ReplyKind::QueueDeleteOk) {
                    Some(pending) => pending.succeed_count(message_count),
                    None => return self.fault(out, 505, "unexpected queue.delete-ok"),
                }
            }

            Method::BasicConsumeOk { consumer_tag } => {
                match self.pop_matching(ReplyKind::BasicConsumeOk) {
                    Some(mut pending) => {
                        let sink = pending.staged_sink.take().unwrap_or_default();
                        self.consumers.insert(consumer_tag.clone(), sink);
                        tracing::debug!(channel = self.id, tag = %consumer_tag, "consumer started");
                        pending.succeed_tag(&consumer_tag);
                    }
                    None => return self.fault(out, 505, "unexpected basic.consume-ok"),
                }
            }

            Method::BasicCancelOk { consumer_tag } => {
                match self.pop_matching(ReplyKind::BasicCancelOk) {
                    Some(pending) => {
                        self.consumers.remove(&consumer_tag);
                        pending.succeed_tag(&consumer_tag);
                    }
                    None => return self.fault(out, 505, "unexpected basic.cancel-ok"),
                }
            }

            // Broker-initiated consumer cancellation (e.g. queue deleted).
            Method::BasicCancel(args) => {
                if !args.no_wait {
                    out.send_method(
                        self.id,
                        &Method::BasicCancelOk {
                            consumer_tag: args.consumer_tag.clone(),
                        },
                    )?;
                }
                if let Some(sink) = self.consumers.remove(&args.consumer_tag) {
                    tracing::debug!(channel = self.id, tag = %args.consumer_tag, "broker cancelled consumer");
                    sink.cancelled(&args.consumer_tag);
                }
            }

            Method::BasicDeliver(args) => {
                self.assembly = Some(Assembly {
                    route: AssemblyRoute::Deliver(args),
                    properties: None,
                    remaining: 0,
                    accum: BytesMut::new(),
                });
            }

            Method::BasicReturn(args) => {
                self.assembly = Some(Assembly {
                    route: AssemblyRoute::Return(args),
                    properties: None,
                    remaining: 0,
                    accum: BytesMut::new(),
                });
            }

            Method::BasicGetOk(args) => match self.pop_matching(ReplyKind::BasicGetReply) {
                Some(pending) => {
                    self.assembly = Some(Assembly {
                        route: AssemblyRoute::Get { args, pending },
                        properties: None,
                        remaining: 0,
                        accum: BytesMut::new(),
                    });
                }
                None => return self.fault(out, 505, "unexpected basic.get-ok"),
            },

            Method::BasicGetEmpty => match self.pop_matching(ReplyKind::BasicGetReply) {
                Some(pending) => pending.succeed_get(None),
                None => return self.fault(out, 505, "unexpected basic.get-empty"),
            },

            other => {
                let text = format!("COMMAND_INVALID - unexpected {}", other.name());
                return self.fault(out, 503, &text);
            }
        }
        Ok(())
    }

    fn resolve_plain(&mut self, kind: ReplyKind, name: &str, out: &mut Outbound) -> Result<()> {
        match self.pop_matching(kind) {
            Some(pending) => {
                pending.succeed_plain();
                Ok(())
            }
            None => {
                let text = format!("unexpected {}", name);
                self.fault(out, 505, &text)
            }
        }
    }

    /// Apply an inbound content HEADER frame.
    pub fn apply_header(&mut self, header: ContentHeader, out: &mut Outbound) -> Result<()> {
        if header.class_id != CLASS_BASIC {
            return self.fault(out, 505, "content header for a non-basic class");
        }
        let assembly = match self.assembly.as_mut() {
            Some(assembly) if assembly.properties.is_none() => assembly,
            _ => {
                return self.fault(
                    out,
                    505,
                    "UNEXPECTED_FRAME - content header without deliver/return/get-ok",
                )
            }
        };

        assembly.remaining = header.body_size;
        assembly.accum = BytesMut::with_capacity(header.body_size.min(1 << 20) as usize);
        assembly.properties = Some(header.properties);
        if assembly.remaining == 0 {
            self.complete_assembly();
        }
        Ok(())
    }

    /// Apply an inbound content BODY frame.
    pub fn apply_body(&mut self, payload: &[u8], out: &mut Outbound) -> Result<()> {
        let assembly = match self.assembly.as_mut() {
            Some(assembly) if assembly.properties.is_some() => assembly,
            _ => return self.fault(out, 505, "UNEXPECTED_FRAME - body without content header"),
        };
        if (payload.len() as u64) > assembly.remaining {
            return self.fault(out, 505, "body exceeds announced size");
        }

        assembly.accum.extend_from_slice(payload);
        assembly.remaining -= payload.len() as u64;
        if assembly.remaining == 0 {
            self.complete_assembly();
        }
        Ok(())
    }

    /// The final BODY byte arrived: dispatch the assembled message.
    fn complete_assembly(&mut self) {
        let assembly = match self.assembly.take() {
            Some(assembly) => assembly,
            None => return,
        };
        let properties = assembly.properties.unwrap_or_default();
        let body = assembly.accum.freeze();

        match assembly.route {
            AssemblyRoute::Deliver(args) => {
                let delivery = Delivery {
                    message: Message {
                        exchange: args.exchange,
                        routing_key: args.routing_key,
                        envelope: Envelope::with_properties(body, properties),
                    },
                    consumer_tag: args.consumer_tag.clone(),
                    delivery_tag: args.delivery_tag,
                    redelivered: args.redelivered,
                };
                match self.consumers.get_mut(&args.consumer_tag) {
                    Some(sink) => sink.deliver(delivery),
                    None => tracing::warn!(
                        channel = self.id,
                        tag = %args.consumer_tag,
                        "delivery for unknown consumer dropped"
                    ),
                }
            }
            AssemblyRoute::Return(args) => {
                let returned = ReturnedMessage {
                    message: Message {
                        exchange: args.exchange,
                        routing_key: args.routing_key,
                        envelope: Envelope::with_properties(body, properties),
                    },
                    reply_code: args.reply_code,
                    reply_text: args.reply_text,
                };
                if let Some(callback) = self.on_returned.as_mut() {
                    callback(returned);
                } else {
                    tracing::warn!(channel = self.id, "returned message dropped: no callback");
                }
            }
            AssemblyRoute::Get { args, pending } => {
                pending.succeed_get(Some(GetMessage {
                    message: Message {
                        exchange: args.exchange,
                        routing_key: args.routing_key,
                        envelope: Envelope::with_properties(body, properties),
                    },
                    delivery_tag: args.delivery_tag,
                    redelivered: args.redelivered,
                    message_count: args.message_count,
                }));
            }
        }
    }
}

/// Handle to one channel of a [`Connection`].
///
/// The handle is a short-lived view: re-fetch it with
/// [`Connection::channel`] after each deferred-returning operation.
/// Operations on a closed channel fail synchronously.
pub struct Channel<'a> {
    conn: &'a mut Connection,
    id: u16,
}

impl<'a> Channel<'a> {
    pub(crate) fn new(conn: &'a mut Connection, id: u16) -> Self {
        Self { conn, id }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// True once channel.open-ok arrived and the channel is not closing.
    pub fn usable(&self) -> bool {
        self.conn
            .core(self.id)
            .map(ChannelCore::usable)
            .unwrap_or(false)
    }

    /// Callback invoked when channel.open-ok arrives.
    pub fn on_ready(&mut self, callback: impl FnOnce() + 'static) {
        if let Ok((core, _)) = self.conn.core_and_out(self.id) {
            core.on_ready = Some(Box::new(callback));
        }
    }

    /// Callback invoked when the channel fails (broker exception or
    /// protocol violation).
    pub fn on_error(&mut self, callback: impl FnOnce(&AmqpError) + 'static) {
        if let Ok((core, _)) = self.conn.core_and_out(self.id) {
            core.on_error = Some(Box::new(callback));
        }
    }

    /// Callback invoked for every returned (unroutable) message.
    pub fn on_returned(&mut self, callback: impl FnMut(ReturnedMessage) + 'static) {
        if let Ok((core, _)) = self.conn.core_and_out(self.id) {
            core.on_returned = Some(Box::new(callback));
        }
    }

    fn request(self, method: Method, pending: Pending) -> Result<&'a mut Pending> {
        let Channel { conn, id } = self;
        let (core, out) = conn.core_and_out(id)?;
        core.ensure_usable()?;
        out.send_method(id, &method)?;
        Ok(core.push_pending(pending))
    }

    /// Pause inbound deliveries (channel.flow active=false).
    pub fn pause(self) -> Result<Deferred<'a>> {
        let id = self.id;
        tracing::debug!(channel = id, "pausing channel");
        self.request(
            Method::ChannelFlow { active: false },
            Pending::plain(ReplyKind::ChannelFlowOk),
        )
        .map(Deferred::new)
    }

    /// Resume inbound deliveries (channel.flow active=true).
    pub fn resume(self) -> Result<Deferred<'a>> {
        self.request(
            Method::ChannelFlow { active: true },
            Pending::plain(ReplyKind::ChannelFlowOk),
        )
        .map(Deferred::new)
    }

    /// tx.select - put the channel in transaction mode.
    pub fn start_transaction(self) -> Result<Deferred<'a>> {
        self.request(Method::TxSelect, Pending::plain(ReplyKind::TxSelectOk))
            .map(Deferred::new)
    }

    /// tx.commit - commit the pending transaction.
    pub fn commit_transaction(self) -> Result<Deferred<'a>> {
        self.request(Method::TxCommit, Pending::plain(ReplyKind::TxCommitOk))
            .map(Deferred::new)
    }

    /// tx.rollback - abandon the pending transaction.
    pub fn rollback_transaction(self) -> Result<Deferred<'a>> {
        self.request(Method::TxRollback, Pending::plain(ReplyKind::TxRollbackOk))
            .map(Deferred::new)
    }

    /// Declare an exchange. Flags: `DURABLE`, `AUTODELETE`, `PASSIVE`,
    /// `INTERNAL`, `NOWAIT`.
    pub fn declare_exchange(
        self,
        name: &str,
        kind: ExchangeType,
        flag_word: u32,
        arguments: FieldTableArg,
    ) -> Result<Deferred<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        let method = Method::ExchangeDeclare(exchange::Declare {
            exchange: name.to_string(),
            kind: kind.as_str().to_string(),
            passive: has(flag_word, flags::PASSIVE),
            durable: has(flag_word, flags::DURABLE),
            auto_delete: has(flag_word, flags::AUTODELETE),
            internal: has(flag_word, flags::INTERNAL),
            no_wait,
            arguments: arguments.unwrap_or_default(),
        });
        if no_wait {
            self.send_nowait(method)?;
            return Ok(Deferred::settled());
        }
        self.request(method, Pending::plain(ReplyKind::ExchangeDeclareOk))
            .map(Deferred::new)
    }

    /// Delete an exchange. Flags: `IFUNUSED`, `NOWAIT`.
    pub fn remove_exchange(self, name: &str, flag_word: u32) -> Result<Deferred<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        let method = Method::ExchangeDelete(exchange::Delete {
            exchange: name.to_string(),
            if_unused: has(flag_word, flags::IFUNUSED),
            no_wait,
        });
        if no_wait {
            self.send_nowait(method)?;
            return Ok(Deferred::settled());
        }
        self.request(method, Pending::plain(ReplyKind::ExchangeDeleteOk))
            .map(Deferred::new)
    }

    /// Bind `source` to `target` exchange. Flags: `NOWAIT`.
    pub fn bind_exchange(
        self,
        source: &str,
        target: &str,
        routing_key: &str,
        flag_word: u32,
        arguments: FieldTableArg,
    ) -> Result<Deferred<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        let method = Method::ExchangeBind(exchange::Bind {
            destination: target.to_string(),
            source: source.to_string(),
            routing_key: routing_key.to_string(),
            no_wait,
            arguments: arguments.unwrap_or_default(),
        });
        if no_wait {
            self.send_nowait(method)?;
            return Ok(Deferred::settled());
        }
        self.request(method, Pending::plain(ReplyKind::ExchangeBindOk))
            .map(Deferred::new)
    }

    /// Unbind `source` from `target` exchange. Flags: `NOWAIT`.
    pub fn unbind_exchange(
        self,
        target: &str,
        source: &str,
        routing_key: &str,
        flag_word: u32,
        arguments: FieldTableArg,
    ) -> Result<Deferred<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        let method = Method::ExchangeUnbind(exchange::Bind {
            destination: target.to_string(),
            source: source.to_string(),
            routing_key: routing_key.to_string(),
            no_wait,
            arguments: arguments.unwrap_or_default(),
        });
        if no_wait {
            self.send_nowait(method)?;
            return Ok(Deferred::settled());
        }
        self.request(method, Pending::plain(ReplyKind::ExchangeUnbindOk))
            .map(Deferred::new)
    }

    /// Declare a queue; an empty name asks the server to assign one.
    /// Flags: `DURABLE`, `AUTODELETE`, `PASSIVE`, `EXCLUSIVE`, `NOWAIT`.
    pub fn declare_queue(
        self,
        name: &str,
        flag_word: u32,
        arguments: FieldTableArg,
    ) -> Result<DeferredQueue<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        let method = Method::QueueDeclare(queue::Declare {
            queue: name.to_string(),
            passive: has(flag_word, flags::PASSIVE),
            durable: has(flag_word, flags::DURABLE),
            exclusive: has(flag_word, flags::EXCLUSIVE),
            auto_delete: has(flag_word, flags::AUTODELETE),
            no_wait,
            arguments: arguments.unwrap_or_default(),
        });
        if no_wait {
            self.send_nowait(method)?;
            return Ok(DeferredQueue::settled(name.to_string()));
        }
        self.request(method, Pending::queue()).map(DeferredQueue::new)
    }

    /// Bind a queue to an exchange. Flags: `NOWAIT`.
    pub fn bind_queue(
        self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
        flag_word: u32,
        arguments: FieldTableArg,
    ) -> Result<Deferred<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        let method = Method::QueueBind(queue::Bind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            no_wait,
            arguments: arguments.unwrap_or_default(),
        });
        if no_wait {
            self.send_nowait(method)?;
            return Ok(Deferred::settled());
        }
        self.request(method, Pending::plain(ReplyKind::QueueBindOk))
            .map(Deferred::new)
    }

    /// Unbind a queue from an exchange. The protocol defines no no-wait
    /// variant for this operation.
    pub fn unbind_queue(
        self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
        arguments: FieldTableArg,
    ) -> Result<Deferred<'a>> {
        let method = Method::QueueUnbind(queue::Unbind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            arguments: arguments.unwrap_or_default(),
        });
        self.request(method, Pending::plain(ReplyKind::QueueUnbindOk))
            .map(Deferred::new)
    }

    /// Remove all messages from a queue. Flags: `NOWAIT`. Success carries
    /// the number of purged messages.
    pub fn purge_queue(self, name: &str, flag_word: u32) -> Result<DeferredDelete<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        let method = Method::QueuePurge(queue::Purge {
            queue: name.to_string(),
            no_wait,
        });
        if no_wait {
            self.send_nowait(method)?;
            return Ok(DeferredDelete::settled());
        }
        self.request(method, Pending::count(ReplyKind::QueuePurgeOk))
            .map(DeferredDelete::new)
    }

    /// Delete a queue. Flags: `IFUNUSED`, `IFEMPTY`, `NOWAIT`. Success
    /// carries the number of deleted messages.
    pub fn remove_queue(self, name: &str, flag_word: u32) -> Result<DeferredDelete<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        let method = Method::QueueDelete(queue::Delete {
            queue: name.to_string(),
            if_unused: has(flag_word, flags::IFUNUSED),
            if_empty: has(flag_word, flags::IFEMPTY),
            no_wait,
        });
        if no_wait {
            self.send_nowait(method)?;
            return Ok(DeferredDelete::settled());
        }
        self.request(method, Pending::count(ReplyKind::QueueDeleteOk))
            .map(DeferredDelete::new)
    }

    /// Publish a message. Flags: `MANDATORY`, `IMMEDIATE`.
    ///
    /// A synchronous write with no deferred: returns false when the
    /// channel cannot accept the publish. Publishing is allowed while
    /// paused - flow control only regulates inbound deliveries.
    pub fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        flag_word: u32,
    ) -> bool {
        let (core, out) = match self.conn.core_and_out(self.id) {
            Ok(parts) => parts,
            Err(_) => return false,
        };
        if !core.usable() {
            return false;
        }
        let method = Method::BasicPublish(basic::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            mandatory: has(flag_word, flags::MANDATORY),
            immediate: has(flag_word, flags::IMMEDIATE),
        });
        let header = ContentHeader::basic(envelope.body.len() as u64, envelope.properties.clone());
        out.send_publish(self.id, &method, &header, &envelope.body)
            .is_ok()
    }

    /// basic.qos - bound the number of unacknowledged deliveries.
    pub fn set_qos(self, prefetch_count: u16) -> Result<Deferred<'a>> {
        self.request(
            Method::BasicQos(basic::Qos {
                prefetch_size: 0,
                prefetch_count,
                global: false,
            }),
            Pending::plain(ReplyKind::BasicQosOk),
        )
        .map(Deferred::new)
    }

    /// Start consuming from a queue. Flags: `NOLOCAL`, `NOACK`,
    /// `EXCLUSIVE`, `NOWAIT`.
    ///
    /// An empty tag asks the server to assign one; combined with `NOWAIT`
    /// that is refused, because the confirmation carrying the assigned tag
    /// is the only way to learn it.
    pub fn consume(
        self,
        queue: &str,
        tag: &str,
        flag_word: u32,
        arguments: FieldTableArg,
    ) -> Result<DeferredConsumer<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        if no_wait && tag.is_empty() {
            return Err(AmqpError::Unsupported(
                "nowait consume with a server-assigned tag: the tag could never be learned".into(),
            ));
        }
        let method = Method::BasicConsume(basic::Consume {
            queue: queue.to_string(),
            consumer_tag: tag.to_string(),
            no_local: has(flag_word, flags::NOLOCAL),
            no_ack: has(flag_word, flags::NOACK),
            exclusive: has(flag_word, flags::EXCLUSIVE),
            no_wait,
            arguments: arguments.unwrap_or_default(),
        });
        if no_wait {
            let Channel { conn, id } = self;
            let (core, out) = conn.core_and_out(id)?;
            core.ensure_usable()?;
            out.send_method(id, &method)?;
            let sink = core
                .consumers
                .entry(tag.to_string())
                .or_insert_with(ConsumerSink::new);
            return Ok(DeferredConsumer::settled(tag.to_string(), sink));
        }
        self.request(method, Pending::consume())
            .map(DeferredConsumer::new)
    }

    /// Stop a consumer. Flags: `NOWAIT`.
    pub fn cancel(self, tag: &str, flag_word: u32) -> Result<DeferredCancel<'a>> {
        let no_wait = has(flag_word, flags::NOWAIT);
        let method = Method::BasicCancel(basic::Cancel {
            consumer_tag: tag.to_string(),
            no_wait,
        });
        if no_wait {
            let Channel { conn, id } = self;
            let (core, out) = conn.core_and_out(id)?;
            core.ensure_usable()?;
            out.send_method(id, &method)?;
            core.consumers.remove(tag);
            return Ok(DeferredCancel::settled(tag.to_string()));
        }
        self.request(method, Pending::tag(ReplyKind::BasicCancelOk))
            .map(DeferredCancel::new)
    }

    /// Fetch a single message. Flags: `NOACK`. Success carries the
    /// message, or `None` when the queue is empty.
    pub fn get(self, queue: &str, flag_word: u32) -> Result<DeferredGet<'a>> {
        self.request(
            Method::BasicGet(basic::Get {
                queue: queue.to_string(),
                no_ack: has(flag_word, flags::NOACK),
            }),
            Pending::get(),
        )
        .map(DeferredGet::new)
    }

    /// Acknowledge a delivery. Flags: `MULTIPLE`. Synchronous write, no
    /// deferred.
    pub fn ack(&mut self, delivery_tag: u64, flag_word: u32) -> bool {
        self.send_unacknowledged(Method::BasicAck(basic::Ack {
            delivery_tag,
            multiple: has(flag_word, flags::MULTIPLE),
        }))
    }

    /// Reject a delivery. Flags: `MULTIPLE`, `REQUEUE`.
    ///
    /// basic.reject cannot express `MULTIPLE`; rejections with that flag
    /// go out as basic.nack instead.
    pub fn reject(&mut self, delivery_tag: u64, flag_word: u32) -> bool {
        let requeue = has(flag_word, flags::REQUEUE);
        let method = if has(flag_word, flags::MULTIPLE) {
            Method::BasicNack(basic::Nack {
                delivery_tag,
                multiple: true,
                requeue,
            })
        } else {
            Method::BasicReject(basic::Reject {
                delivery_tag,
                requeue,
            })
        };
        self.send_unacknowledged(method)
    }

    /// Ask the broker to redeliver all unacknowledged messages. Flags:
    /// `REQUEUE`.
    pub fn recover(self, flag_word: u32) -> Result<Deferred<'a>> {
        self.request(
            Method::BasicRecover {
                requeue: has(flag_word, flags::REQUEUE),
            },
            Pending::plain(ReplyKind::BasicRecoverOk),
        )
        .map(Deferred::new)
    }

    /// Close the channel. The close is serialized behind every pending
    /// reply, so earlier deferreds still resolve first.
    pub fn close(self) -> Result<Deferred<'a>> {
        let Channel { conn, id } = self;
        let (core, out) = conn.core_and_out(id)?;
        core.ensure_usable()?;
        let method = Method::ChannelClose(connection_args::Close {
            reply_code: 0,
            reply_text: String::new(),
            class_id: 0,
            method_id: 0,
        });
        out.send_method(id, &method)?;
        core.mark_closing();
        Ok(Deferred::new(
            core.push_pending(Pending::plain(ReplyKind::ChannelCloseOk)),
        ))
    }

    fn send_nowait(self, method: Method) -> Result<()> {
        let (core, out) = self.conn.core_and_out(self.id)?;
        core.ensure_usable()?;
        out.send_method(self.id, &method)
    }

    fn send_unacknowledged(&mut self, method: Method) -> bool {
        let (core, out) = match self.conn.core_and_out(self.id) {
            Ok(parts) => parts,
            Err(_) => return false,
        };
        if !core.usable() {
            return false;
        }
        out.send_method(self.id, &method).is_ok()
    }
}

/// Optional arguments table: `None` means empty.
pub type FieldTableArg = Option<crate::wire::FieldTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ready_core(id: u16) -> ChannelCore {
        let mut core = ChannelCore::new(id);
        core.status = ChannelStatus::Ready;
        core
    }

    fn out() -> Outbound {
        Outbound::new(131_072)
    }

    #[test]
    fn test_open_ok_fires_ready_in_order() {
        let mut core = ChannelCore::new(1);
        let mut out = out();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        core.on_ready = Some(Box::new(move || l.borrow_mut().push("ready")));
        core.push_pending(Pending::plain(ReplyKind::ChannelOpenOk));

        core.apply_method(Method::ChannelOpenOk, &mut out).unwrap();
        assert!(core.usable());
        assert_eq!(*log.borrow(), vec!["ready"]);
    }

    #[test]
    fn test_broker_close_fails_all_pending_in_order() {
        let mut core = ready_core(1);
        let mut out = out();
        let errors: Rc<RefCell<Vec<AmqpError>>> = Rc::new(RefCell::new(Vec::new()));

        for _ in 0..2 {
            let pending = core.push_pending(Pending::plain(ReplyKind::TxSelectOk));
            let sink = errors.clone();
            pending.on_error = Some(Box::new(move |e| sink.borrow_mut().push(e.clone())));
        }

        core.apply_method(
            Method::ChannelClose(connection_args::Close {
                reply_code: 406,
                reply_text: "PRECONDITION_FAILED".into(),
                class_id: 40,
                method_id: 10,
            }),
            &mut out,
        )
        .unwrap();

        let expected = AmqpError::ChannelException {
            code: 406,
            text: "PRECONDITION_FAILED".into(),
        };
        assert_eq!(*errors.borrow(), vec![expected.clone(), expected]);
        assert_eq!(core.status, ChannelStatus::Closed);

        // The close must have been acked.
        let wire = out.drain();
        let decoded = Method::decode(&wire[7..wire.len() - 1]).unwrap();
        assert_eq!(decoded, Method::ChannelCloseOk);
    }

    #[test]
    fn test_reply_mismatch_faults_channel_with_505() {
        let mut core = ready_core(1);
        let mut out = out();
        core.push_pending(Pending::plain(ReplyKind::TxSelectOk));

        // tx.commit-ok cannot resolve a tx.select round-trip.
        core.apply_method(Method::TxCommitOk, &mut out).unwrap();

        assert_eq!(core.status, ChannelStatus::Closing);
        let wire = out.drain();
        match Method::decode(&wire[7..wire.len() - 1]).unwrap() {
            Method::ChannelClose(args) => assert_eq!(args.reply_code, 505),
            other => panic!("expected channel.close, got {:?}", other),
        }
    }

    #[test]
    fn test_method_during_assembly_is_a_fault() {
        let mut core = ready_core(1);
        let mut out = out();
        core.consumers.insert("t".into(), ConsumerSink::new());

        core.apply_method(
            Method::BasicDeliver(basic::Deliver {
                consumer_tag: "t".into(),
                delivery_tag: 1,
                redelivered: false,
                exchange: String::new(),
                routing_key: "q".into(),
            }),
            &mut out,
        )
        .unwrap();

        // HEADER expected next; a method instead kills the channel.
        core.apply_method(Method::TxSelectOk, &mut out).unwrap();
        assert_eq!(core.status, ChannelStatus::Closing);
        assert!(core.assembly.is_none());
    }

    #[test]
    fn test_delivery_assembled_from_split_body() {
        let mut core = ready_core(1);
        let mut out = out();
        let received: Rc<RefCell<Vec<Delivery>>> = Rc::new(RefCell::new(Vec::new()));
        let sink_log = received.clone();
        let mut sink = ConsumerSink::new();
        sink.on_received = Some(Box::new(move |d| sink_log.borrow_mut().push(d)));
        core.consumers.insert("tag-1".into(), sink);

        core.apply_method(
            Method::BasicDeliver(basic::Deliver {
                consumer_tag: "tag-1".into(),
                delivery_tag: 7,
                redelivered: true,
                exchange: "logs".into(),
                routing_key: "error".into(),
            }),
            &mut out,
        )
        .unwrap();
        core.apply_header(ContentHeader::basic(10, Properties::default()), &mut out)
            .unwrap();
        core.apply_body(b"hello ", &mut out).unwrap();
        assert!(received.borrow().is_empty());
        core.apply_body(b"worl", &mut out).unwrap();

        let got = received.borrow();
        assert_eq!(got.len(), 1);
        assert_eq!(&got[0].message.envelope.body[..], b"hello worl");
        assert_eq!(got[0].delivery_tag, 7);
        assert!(got[0].redelivered);
        assert_eq!(got[0].message.exchange, "logs");
    }

    #[test]
    fn test_zero_length_body_completes_on_header() {
        let mut core = ready_core(1);
        let mut out = out();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let mut sink = ConsumerSink::new();
        sink.on_received = Some(Box::new(move |_| *c.borrow_mut() += 1));
        core.consumers.insert("t".into(), sink);

        core.apply_method(
            Method::BasicDeliver(basic::Deliver {
                consumer_tag: "t".into(),
                delivery_tag: 1,
                redelivered: false,
                exchange: String::new(),
                routing_key: "q".into(),
            }),
            &mut out,
        )
        .unwrap();
        core.apply_header(ContentHeader::basic(0, Properties::default()), &mut out)
            .unwrap();

        assert_eq!(*count.borrow(), 1);
        assert!(core.assembly.is_none());
    }

    #[test]
    fn test_body_overflow_is_a_fault() {
        let mut core = ready_core(1);
        let mut out = out();
        core.apply_method(
            Method::BasicReturn(basic::Return {
                reply_code: 312,
                reply_text: "NO_ROUTE".into(),
                exchange: "e".into(),
                routing_key: "k".into(),
            }),
            &mut out,
        )
        .unwrap();
        core.apply_header(ContentHeader::basic(3, Properties::default()), &mut out)
            .unwrap();

        core.apply_body(b"toolong", &mut out).unwrap();
        assert_eq!(core.status, ChannelStatus::Closing);
    }

    #[test]
    fn test_broker_cancel_fires_on_cancelled() {
        let mut core = ready_core(1);
        let mut out = out();
        let cancelled = Rc::new(RefCell::new(String::new()));
        let c = cancelled.clone();
        let mut sink = ConsumerSink::new();
        sink.on_cancelled = Some(Box::new(move |tag| *c.borrow_mut() = tag.to_string()));
        core.consumers.insert("ctag".into(), sink);

        core.apply_method(
            Method::BasicCancel(basic::Cancel {
                consumer_tag: "ctag".into(),
                no_wait: false,
            }),
            &mut out,
        )
        .unwrap();

        assert_eq!(*cancelled.borrow(), "ctag");
        assert!(core.consumers.is_empty());
        // The broker-initiated cancel expects an ack.
        let wire = out.drain();
        match Method::decode(&wire[7..wire.len() - 1]).unwrap() {
            Method::BasicCancelOk { consumer_tag } => assert_eq!(consumer_tag, "ctag"),
            other => panic!("expected basic.cancel-ok, got {:?}", other),
        }
    }
}
