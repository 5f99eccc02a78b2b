//! # amqp-engine
//!
//! A transport-agnostic AMQP 0-9-1 client engine for RabbitMQ-compatible
//! brokers.
//!
//! The crate contains no sockets, threads, or timers: the caller owns the
//! transport and feeds raw bytes in, the engine drives the protocol and
//! queues raw bytes out. Everything asynchronous is expressed as a
//! deferred - a handle carrying callbacks that fire when the broker's
//! reply arrives through a later [`Connection::push_bytes`].
//!
//! ## Architecture
//!
//! - **Wire layer** ([`wire`]): scalar codecs, field tables, frame
//!   encode/decode with partial-read buffering
//! - **Method registry** ([`methods`]): typed argument structs and the
//!   [`methods::Method`] dispatcher for every supported class
//! - **Engine** ([`Connection`]): handshake, tune negotiation,
//!   heartbeats, channel multiplexing, orderly and error close
//! - **Channels** ([`Channel`]): the operations catalog
//!   (declare/bind/publish/consume/ack/...) with per-channel FIFO
//!   reply correlation and inbound message assembly
//!
//! ## Example
//!
//! ```no_run
//! use amqp_engine::{flags, Connection, ConnectionOptions, Envelope};
//!
//! let mut conn = Connection::new(ConnectionOptions::default());
//! let id = conn.open_channel()?;
//!
//! // ... drive conn.drain_output() / conn.push_bytes() against the
//! // socket until the handshake completes ...
//!
//! conn.channel(id)?
//!     .declare_queue("jobs", flags::DURABLE, None)?
//!     .on_success(|name, messages, consumers| {
//!         println!("{name}: {messages} messages, {consumers} consumers");
//!     });
//!
//! conn.channel(id)?.publish("", "jobs", &Envelope::from("hi"), 0);
//! # Ok::<(), amqp_engine::AmqpError>(())
//! ```
//!
//! ## Threading
//!
//! The engine is single-threaded by contract: drive `push_bytes`,
//! `heartbeat_tick`, and all channel operations from one logical
//! executor. Callbacks fire synchronously inside those calls.

pub mod channel;
pub mod connection;
pub mod error;
pub mod message;
pub mod methods;
pub mod wire;

mod consumer;
mod deferred;

pub use channel::{flags, Channel, ExchangeType};
pub use connection::{Connection, ConnectionOptions, PROTOCOL_HEADER};
pub use deferred::{
    Deferred, DeferredCancel, DeferredConsumer, DeferredDelete, DeferredGet, DeferredQueue,
};
pub use error::{AmqpError, Result};
pub use message::{
    ContentHeader, Delivery, Envelope, GetMessage, Message, Properties, ReturnedMessage,
};
pub use wire::{Decimal, FieldTable, FieldValue, Frame, FrameBuffer, FrameKind};
