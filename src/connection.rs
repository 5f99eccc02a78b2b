//! Connection engine - byte-in/byte-out driver for one broker connection.
//!
//! The engine is transport-agnostic: the caller reads bytes from its
//! socket and hands them to [`Connection::push_bytes`], then writes
//! whatever [`Connection::drain_output`] returns back to the socket. All
//! protocol work (handshake, channel multiplexing, heartbeats, close
//! semantics) happens inside those two calls plus the caller-driven
//! [`Connection::heartbeat_tick`].
//!
//! # Example
//!
//! ```no_run
//! use amqp_engine::{Connection, ConnectionOptions};
//!
//! let mut conn = Connection::new(ConnectionOptions::default());
//! conn.on_ready(|| println!("handshake complete"));
//!
//! // caller's event loop:
//! // socket.write_all(&conn.drain_output())?;
//! // conn.push_bytes(&socket_read_buf)?;
//! ```

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};

use crate::channel::{Channel, ChannelCore};
use crate::deferred::{Pending, ReplyKind};
use crate::error::{AmqpError, Result};
use crate::message::ContentHeader;
use crate::methods::{connection as connection_args, Method};
use crate::wire::{Frame, FrameBuffer, FrameKind, FieldTable, FRAME_OVERHEAD};

/// The 8-byte preamble selecting AMQP 0-9-1.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

/// Connection parameters and client limits offered during tune
/// negotiation. A zero limit means "no preference" and adopts the
/// server's value.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub login: String,
    pub password: String,
    pub vhost: String,
    pub channel_max: u16,
    pub frame_max: u32,
    /// Desired heartbeat interval in seconds; 0 disables heartbeats.
    pub heartbeat: u16,
    pub locale: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            login: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            channel_max: 2047,
            frame_max: 131_072,
            heartbeat: 60,
            locale: "en_US".to_string(),
        }
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    /// Protocol header sent, waiting for connection.start.
    AwaitingStart,
    AwaitingTune,
    AwaitingOpenOk,
    Connected,
    /// connection.close sent, waiting for close-ok.
    Closing,
    Closed,
}

/// The engine-owned outbound byte queue.
///
/// Frames are encoded straight into a single `BytesMut` the caller
/// drains; emission stamps the send clock for heartbeat accounting.
pub(crate) struct Outbound {
    buf: BytesMut,
    pub frame_max: u32,
    /// Last value passed to heartbeat_tick.
    pub clock: u64,
    /// Tick value at the last frame emission.
    pub last_sent: u64,
}

impl Outbound {
    pub fn new(frame_max: u32) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            frame_max,
            clock: 0,
            last_sent: 0,
        }
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.last_sent = self.clock;
    }

    fn send_frame(&mut self, frame: &Frame) {
        frame.encode(&mut self.buf);
        self.last_sent = self.clock;
    }

    pub fn send_method(&mut self, channel: u16, method: &Method) -> Result<()> {
        let payload = method.encode()?;
        tracing::trace!(channel, method = method.name(), "sending method");
        self.send_frame(&Frame::method(channel, payload));
        Ok(())
    }

    pub fn send_heartbeat(&mut self) {
        tracing::trace!("sending heartbeat");
        self.send_frame(&Frame::heartbeat());
    }

    /// Emit one publish as method + header + body frames, each body frame
    /// bounded by the negotiated frame-max. The three parts are encoded
    /// before anything is queued, so a failure leaves the buffer clean.
    pub fn send_publish(
        &mut self,
        channel: u16,
        method: &Method,
        header: &ContentHeader,
        body: &Bytes,
    ) -> Result<()> {
        let method_payload = method.encode()?;
        let header_payload = header.encode()?;

        self.send_frame(&Frame::method(channel, method_payload));
        self.send_frame(&Frame::header(channel, header_payload));

        let max_chunk = (self.frame_max as usize).saturating_sub(FRAME_OVERHEAD).max(1);
        let mut offset = 0;
        while offset < body.len() {
            let end = (offset + max_chunk).min(body.len());
            self.send_frame(&Frame::body(channel, body.slice(offset..end)));
            offset = end;
        }
        Ok(())
    }

    pub fn drain(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

/// A connection engine multiplexing channels over one byte stream.
pub struct Connection {
    opts: ConnectionOptions,
    state: ConnectionState,
    inbound: FrameBuffer,
    out: Outbound,
    channels: HashMap<u16, ChannelCore>,
    /// Channels opened before the handshake finished; their channel.open
    /// goes out on connection.open-ok.
    queued_opens: Vec<u16>,
    /// Negotiated limits (client options until tune completes).
    channel_max: u16,
    heartbeat: u16,
    /// Tick value when the last frame (or handshake byte) arrived.
    last_received: u64,
    error: Option<AmqpError>,
    on_ready: Option<Box<dyn FnOnce()>>,
    on_error: Option<Box<dyn FnOnce(&AmqpError)>>,
    on_closed: Option<Box<dyn FnOnce()>>,
    on_blocked: Option<Box<dyn FnMut(&str)>>,
    on_unblocked: Option<Box<dyn FnMut()>>,
}

impl Connection {
    /// Create the engine and queue the protocol header for the caller to
    /// flush.
    pub fn new(opts: ConnectionOptions) -> Self {
        let mut out = Outbound::new(opts.frame_max);
        out.send_raw(&PROTOCOL_HEADER);
        tracing::debug!(vhost = %opts.vhost, "protocol header queued");
        Self {
            channel_max: opts.channel_max,
            inbound: FrameBuffer::with_frame_max(opts.frame_max),
            out,
            opts,
            state: ConnectionState::AwaitingStart,
            channels: HashMap::new(),
            queued_opens: Vec::new(),
            heartbeat: 0,
            last_received: 0,
            error: None,
            on_ready: None,
            on_error: None,
            on_closed: None,
            on_blocked: None,
            on_unblocked: None,
        }
    }

    /// Callback invoked once connection.open-ok completes the handshake.
    pub fn on_ready(&mut self, callback: impl FnOnce() + 'static) {
        self.on_ready = Some(Box::new(callback));
    }

    /// Callback invoked on any connection-fatal error.
    pub fn on_error(&mut self, callback: impl FnOnce(&AmqpError) + 'static) {
        self.on_error = Some(Box::new(callback));
    }

    /// Callback invoked when the connection reaches Closed after an
    /// orderly close.
    pub fn on_closed(&mut self, callback: impl FnOnce() + 'static) {
        self.on_closed = Some(Box::new(callback));
    }

    /// Callback for connection.blocked notifications.
    pub fn on_blocked(&mut self, callback: impl FnMut(&str) + 'static) {
        self.on_blocked = Some(Box::new(callback));
    }

    /// Callback for connection.unblocked notifications.
    pub fn on_unblocked(&mut self, callback: impl FnMut() + 'static) {
        self.on_unblocked = Some(Box::new(callback));
    }

    /// Handshake finished and no close in progress.
    pub fn ready(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// The connection-fatal error, if one occurred.
    pub fn failure(&self) -> Option<&AmqpError> {
        self.error.as_ref()
    }

    /// Negotiated frame-max (client preference until tune completes).
    pub fn frame_max(&self) -> u32 {
        self.out.frame_max
    }

    /// Negotiated heartbeat interval in seconds (0 = disabled).
    pub fn heartbeat(&self) -> u16 {
        self.heartbeat
    }

    /// Bytes waiting to be written to the transport.
    pub fn output(&self) -> &[u8] {
        &self.out.buf
    }

    /// Discard `n` bytes of output the caller has written out.
    pub fn consume_output(&mut self, n: usize) {
        self.out.buf.advance(n);
    }

    /// Take the entire pending output.
    pub fn drain_output(&mut self) -> Bytes {
        self.out.drain()
    }

    /// Optional readiness hint from the caller's event loop. The engine
    /// buffers internally, so this is a no-op.
    pub fn notify_writable(&mut self) {}

    /// Feed bytes received from the transport and run the protocol.
    ///
    /// Channel-level problems are reported through channel callbacks and
    /// deferred errors; an `Err` here means the connection itself is dead
    /// (framing violation, handshake failure, protocol mismatch). Flush
    /// [`Connection::drain_output`] once more before dropping the
    /// transport - a close-ok or error ack may be queued.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let frames = match self.inbound.push(data) {
            Ok(frames) => frames,
            Err(err) => {
                // A server that rejects our protocol header answers with
                // its own "AMQP<maj><min>" preamble, which cannot parse
                // as a frame.
                let err = if self.state == ConnectionState::AwaitingStart {
                    AmqpError::ProtocolMismatch
                } else {
                    err
                };
                self.fail(err.clone());
                return Err(err);
            }
        };

        self.last_received = self.out.clock;

        for frame in frames {
            if let Err(err) = self.handle_frame(frame) {
                self.fail(err.clone());
                return Err(err);
            }
            if self.error.is_some() {
                break;
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        tracing::trace!(kind = ?frame.kind, channel = frame.channel, size = frame.payload.len(), "frame received");
        match frame.kind {
            FrameKind::Heartbeat => {
                if frame.channel != 0 {
                    return Err(AmqpError::UnexpectedFrame(
                        "heartbeat on a non-zero channel".into(),
                    ));
                }
                Ok(())
            }
            FrameKind::Method if frame.channel == 0 => {
                let method = Method::decode(&frame.payload)?;
                self.handle_connection_method(method)
            }
            FrameKind::Method => {
                let method = Method::decode(&frame.payload)?;
                if method.class_id() == crate::methods::CLASS_CONNECTION {
                    return Err(AmqpError::UnexpectedFrame(
                        "connection method on a non-zero channel".into(),
                    ));
                }
                let core = self.channels.get_mut(&frame.channel).ok_or_else(|| {
                    AmqpError::UnexpectedFrame(format!("frame for unknown channel {}", frame.channel))
                })?;
                core.apply_method(method, &mut self.out)
            }
            FrameKind::Header => {
                if frame.channel == 0 {
                    return Err(AmqpError::UnexpectedFrame(
                        "content header on channel 0".into(),
                    ));
                }
                let header = ContentHeader::decode(&frame.payload)?;
                let core = self.channels.get_mut(&frame.channel).ok_or_else(|| {
                    AmqpError::UnexpectedFrame(format!("frame for unknown channel {}", frame.channel))
                })?;
                core.apply_header(header, &mut self.out)
            }
            FrameKind::Body => {
                if frame.channel == 0 {
                    return Err(AmqpError::UnexpectedFrame("content body on channel 0".into()));
                }
                let core = self.channels.get_mut(&frame.channel).ok_or_else(|| {
                    AmqpError::UnexpectedFrame(format!("frame for unknown channel {}", frame.channel))
                })?;
                core.apply_body(&frame.payload, &mut self.out)
            }
        }
    }

    fn handle_connection_method(&mut self, method: Method) -> Result<()> {
        match (self.state, method) {
            (ConnectionState::AwaitingStart, Method::ConnectionStart(args)) => {
                self.handle_start(args)
            }
            (ConnectionState::AwaitingTune, Method::ConnectionTune(args)) => self.handle_tune(args),
            (ConnectionState::AwaitingOpenOk, Method::ConnectionOpenOk) => {
                self.state = ConnectionState::Connected;
                tracing::debug!("connection ready");
                for id in std::mem::take(&mut self.queued_opens) {
                    if let Some(core) = self.channels.get_mut(&id) {
                        self.out.send_method(id, &Method::ChannelOpen)?;
                        core.push_pending(Pending::plain(ReplyKind::ChannelOpenOk));
                    }
                }
                if let Some(callback) = self.on_ready.take() {
                    callback();
                }
                Ok(())
            }
            (_, Method::ConnectionClose(args)) => {
                self.out.send_method(0, &Method::ConnectionCloseOk)?;
                let err = if args.reply_code == 403 {
                    AmqpError::AuthenticationFailed(args.reply_text)
                } else {
                    AmqpError::ConnectionException {
                        code: args.reply_code,
                        text: args.reply_text,
                    }
                };
                tracing::debug!(error = %err, "broker closed connection");
                self.fail(err);
                Ok(())
            }
            (ConnectionState::Closing, Method::ConnectionCloseOk) => {
                self.state = ConnectionState::Closed;
                let err = AmqpError::ConnectionClosed;
                for core in self.channels.values_mut() {
                    core.fail_all(&err);
                }
                tracing::debug!("connection closed");
                if let Some(callback) = self.on_closed.take() {
                    callback();
                }
                Ok(())
            }
            (_, Method::ConnectionBlocked(args)) => {
                if let Some(callback) = self.on_blocked.as_mut() {
                    callback(&args.reason);
                }
                Ok(())
            }
            (_, Method::ConnectionUnblocked) => {
                if let Some(callback) = self.on_unblocked.as_mut() {
                    callback();
                }
                Ok(())
            }
            (state, method) => Err(AmqpError::UnexpectedFrame(format!(
                "{} in connection state {:?}",
                method.name(),
                state
            ))),
        }
    }

    fn handle_start(&mut self, args: connection_args::Start) -> Result<()> {
        if (args.version_major, args.version_minor) != (0, 9) {
            return Err(AmqpError::ProtocolMismatch);
        }

        let offered: Vec<&str> = args.mechanisms.split_whitespace().collect();
        let (mechanism, response) = if offered.contains(&"PLAIN") {
            let mut response = Vec::with_capacity(2 + self.opts.login.len() + self.opts.password.len());
            response.push(0);
            response.extend_from_slice(self.opts.login.as_bytes());
            response.push(0);
            response.extend_from_slice(self.opts.password.as_bytes());
            ("PLAIN", Bytes::from(response))
        } else if offered.contains(&"AMQPLAIN") {
            // The AMQPLAIN response is a bare field-table body (no length
            // prefix).
            let table = FieldTable::new()
                .with("LOGIN", self.opts.login.as_str())
                .with("PASSWORD", self.opts.password.as_str());
            let mut buf = BytesMut::new();
            table.encode_entries(&mut buf)?;
            ("AMQPLAIN", buf.freeze())
        } else {
            return Err(AmqpError::Unsupported(format!(
                "no common authentication mechanism in '{}'",
                args.mechanisms
            )));
        };

        let locale = args
            .locales
            .split_whitespace()
            .find(|l| *l == self.opts.locale)
            .unwrap_or_else(|| args.locales.split_whitespace().next().unwrap_or("en_US"))
            .to_string();

        let capabilities = FieldTable::new()
            .with("basic.nack", true)
            .with("consumer_cancel_notify", true)
            .with("connection.blocked", true)
            .with("authentication_failure_close", true);
        let client_properties = FieldTable::new()
            .with("product", env!("CARGO_PKG_NAME"))
            .with("version", env!("CARGO_PKG_VERSION"))
            .with("platform", "Rust")
            .with("capabilities", capabilities);

        tracing::debug!(mechanism, locale = %locale, "authenticating");
        self.out.send_method(
            0,
            &Method::ConnectionStartOk(connection_args::StartOk {
                client_properties,
                mechanism: mechanism.to_string(),
                response,
                locale,
            }),
        )?;
        self.state = ConnectionState::AwaitingTune;
        Ok(())
    }

    fn handle_tune(&mut self, args: connection_args::Tune) -> Result<()> {
        fn pick_u16(client: u16, server: u16) -> u16 {
            match (client, server) {
                (0, s) => s,
                (c, 0) => c,
                (c, s) => c.min(s),
            }
        }
        fn pick_u32(client: u32, server: u32) -> u32 {
            match (client, server) {
                (0, s) => s,
                (c, 0) => c,
                (c, s) => c.min(s),
            }
        }

        self.channel_max = pick_u16(self.opts.channel_max, args.channel_max);
        let frame_max = pick_u32(self.opts.frame_max, args.frame_max);
        self.heartbeat = pick_u16(self.opts.heartbeat, args.heartbeat);

        self.out.frame_max = frame_max;
        self.inbound.set_frame_max(frame_max);
        tracing::debug!(
            channel_max = self.channel_max,
            frame_max,
            heartbeat = self.heartbeat,
            "tuned"
        );

        self.out.send_method(
            0,
            &Method::ConnectionTuneOk(connection_args::Tune {
                channel_max: self.channel_max,
                frame_max,
                heartbeat: self.heartbeat,
            }),
        )?;
        self.out.send_method(
            0,
            &Method::ConnectionOpen(connection_args::Open {
                virtual_host: self.opts.vhost.clone(),
            }),
        )?;
        self.state = ConnectionState::AwaitingOpenOk;
        Ok(())
    }

    /// Allocate the lowest free channel id and send channel.open (queued
    /// until the handshake completes). The returned id keys
    /// [`Connection::channel`].
    pub fn open_channel(&mut self) -> Result<u16> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return Err(AmqpError::ConnectionClosed);
        }

        let max = if self.channel_max == 0 {
            u16::MAX
        } else {
            self.channel_max
        };
        let id = (1..=max)
            .find(|id| {
                self.channels
                    .get(id)
                    .map(ChannelCore::reusable)
                    .unwrap_or(true)
            })
            .ok_or_else(|| AmqpError::Unsupported(format!("all {} channel ids in use", max)))?;

        let mut core = ChannelCore::new(id);
        if self.state == ConnectionState::Connected {
            self.out.send_method(id, &Method::ChannelOpen)?;
            core.push_pending(Pending::plain(ReplyKind::ChannelOpenOk));
        } else {
            self.queued_opens.push(id);
        }
        tracing::debug!(channel = id, "channel allocated");
        self.channels.insert(id, core);
        Ok(id)
    }

    /// Borrow a handle to an allocated channel.
    pub fn channel(&mut self, id: u16) -> Result<Channel<'_>> {
        if !self.channels.contains_key(&id) {
            return Err(AmqpError::ChannelClosed);
        }
        Ok(Channel::new(self, id))
    }

    pub(crate) fn core(&self, id: u16) -> Result<&ChannelCore> {
        self.channels.get(&id).ok_or(AmqpError::ChannelClosed)
    }

    pub(crate) fn core_and_out(&mut self, id: u16) -> Result<(&mut ChannelCore, &mut Outbound)> {
        match self.channels.get_mut(&id) {
            Some(core) => Ok((core, &mut self.out)),
            None => Err(AmqpError::ChannelClosed),
        }
    }

    /// Advance the engine clock.
    ///
    /// With a negotiated heartbeat of `h` seconds: a heartbeat frame goes
    /// out when nothing was sent for `h` seconds, and the connection
    /// fails with [`AmqpError::HeartbeatTimeout`] when nothing arrived
    /// for `2*h` seconds.
    pub fn heartbeat_tick(&mut self, now: u64) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.out.clock = now;

        if self.heartbeat == 0 || self.state == ConnectionState::Closed {
            return Ok(());
        }

        let interval = self.heartbeat as u64;
        if now.saturating_sub(self.last_received) >= 2 * interval {
            let err = AmqpError::HeartbeatTimeout;
            tracing::error!(idle = now - self.last_received, "heartbeat timeout");
            self.fail(err.clone());
            return Err(err);
        }
        if now.saturating_sub(self.out.last_sent) >= interval {
            self.out.send_heartbeat();
        }
        Ok(())
    }

    /// Start an orderly shutdown: emit connection.close and put every
    /// channel into Closing. Pending deferreds resolve with
    /// `ConnectionClosed` once the broker acks.
    pub fn close(&mut self) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return Ok(());
        }
        self.out.send_method(
            0,
            &Method::ConnectionClose(connection_args::Close {
                reply_code: 200,
                reply_text: "goodbye".to_string(),
                class_id: 0,
                method_id: 0,
            }),
        )?;
        self.state = ConnectionState::Closing;
        for core in self.channels.values_mut() {
            core.mark_closing();
        }
        tracing::debug!("connection closing");
        Ok(())
    }

    /// Connection-fatal failure: fan the error out to every channel and
    /// the connection error callback, then latch Closed.
    fn fail(&mut self, err: AmqpError) {
        if self.error.is_some() {
            return;
        }
        self.error = Some(err.clone());
        self.state = ConnectionState::Closed;
        for core in self.channels.values_mut() {
            core.fail_all(&err);
        }
        if let Some(callback) = self.on_error.take() {
            callback(&err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_header_is_queued_on_construction() {
        let mut conn = Connection::new(ConnectionOptions::default());
        assert_eq!(&conn.drain_output()[..], &PROTOCOL_HEADER);
        assert!(!conn.ready());
    }

    #[test]
    fn test_protocol_mismatch_on_server_preamble() {
        let mut conn = Connection::new(ConnectionOptions::default());
        let _ = conn.drain_output();
        // An AMQP 1.0-only server echoes its own protocol header.
        let result = conn.push_bytes(b"AMQP\x01\x01\x00\x0a");
        assert_eq!(result, Err(AmqpError::ProtocolMismatch));
        assert!(conn.closed());
    }

    #[test]
    fn test_output_view_and_consume() {
        let mut conn = Connection::new(ConnectionOptions::default());
        assert_eq!(conn.output().len(), 8);
        conn.consume_output(3);
        assert_eq!(conn.output(), &PROTOCOL_HEADER[3..]);
        conn.notify_writable();
        assert_eq!(conn.output().len(), 5);
    }

    #[test]
    fn test_push_after_failure_keeps_returning_the_error() {
        let mut conn = Connection::new(ConnectionOptions::default());
        let _ = conn.push_bytes(b"AMQP\x01\x01\x00\x0a");
        assert_eq!(
            conn.push_bytes(b"\x01\x00\x00"),
            Err(AmqpError::ProtocolMismatch)
        );
    }

    #[test]
    fn test_open_channel_before_ready_is_queued() {
        let mut conn = Connection::new(ConnectionOptions::default());
        let id = conn.open_channel().unwrap();
        assert_eq!(id, 1);
        // Nothing but the protocol header may be on the wire yet.
        assert_eq!(conn.drain_output().len(), 8);
    }

    #[test]
    fn test_channel_ids_allocate_lowest_free() {
        let mut conn = Connection::new(ConnectionOptions::default());
        assert_eq!(conn.open_channel().unwrap(), 1);
        assert_eq!(conn.open_channel().unwrap(), 2);
        assert_eq!(conn.open_channel().unwrap(), 3);
    }

    #[test]
    fn test_unknown_channel_lookup_fails() {
        let mut conn = Connection::new(ConnectionOptions::default());
        assert!(conn.channel(5).is_err());
    }
}
