//! Deferred pipeline - pending method round-trips and their callbacks.
//!
//! Every synchronous request emitted on a channel appends a [`Pending`]
//! entry to that channel's FIFO; the next valid reply method pops and
//! resolves the head, so resolution order always matches emission order.
//! Callers never see `Pending` directly: operations return typed handles
//! ([`Deferred`], [`DeferredQueue`], ...) that install callbacks into the
//! entry. Each slot holds at most one callable; re-assignment replaces.
//! The finalize callback runs exactly once, after success or error.

use crate::consumer::ConsumerSink;
use crate::error::AmqpError;
use crate::message::{Delivery, GetMessage};

/// Which reply method settles a pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyKind {
    ChannelOpenOk,
    ChannelFlowOk,
    ChannelCloseOk,
    ExchangeDeclareOk,
    ExchangeDeleteOk,
    ExchangeBindOk,
    ExchangeUnbindOk,
    QueueDeclareOk,
    QueueBindOk,
    QueuePurgeOk,
    QueueDeleteOk,
    QueueUnbindOk,
    BasicQosOk,
    BasicConsumeOk,
    BasicCancelOk,
    BasicRecoverOk,
    /// basic.get answers with either get-ok or get-empty.
    BasicGetReply,
    TxSelectOk,
    TxCommitOk,
    TxRollbackOk,
}

/// Typed success callback storage, one shape per reply family.
pub(crate) enum SuccessSlot {
    Plain(Option<Box<dyn FnOnce()>>),
    /// queue.declare-ok: name, message count, consumer count.
    Queue(Option<Box<dyn FnOnce(&str, u32, u32)>>),
    /// queue.delete-ok / queue.purge-ok: message count.
    Count(Option<Box<dyn FnOnce(u32)>>),
    /// basic.consume-ok / basic.cancel-ok: consumer tag.
    Tag(Option<Box<dyn FnOnce(&str)>>),
    /// basic.get: the fetched message, or None on get-empty.
    Get(Option<Box<dyn FnOnce(Option<GetMessage>)>>),
}

/// One entry in a channel's pending-reply FIFO.
pub(crate) struct Pending {
    pub reply: ReplyKind,
    pub success: SuccessSlot,
    pub on_error: Option<Box<dyn FnOnce(&AmqpError)>>,
    pub on_finalize: Option<Box<dyn FnOnce()>>,
    /// Consumer callbacks staged until basic.consume-ok confirms the tag.
    pub staged_sink: Option<ConsumerSink>,
}

impl Pending {
    pub fn plain(reply: ReplyKind) -> Self {
        Self::with_slot(reply, SuccessSlot::Plain(None))
    }

    pub fn queue() -> Self {
        Self::with_slot(ReplyKind::QueueDeclareOk, SuccessSlot::Queue(None))
    }

    pub fn count(reply: ReplyKind) -> Self {
        Self::with_slot(reply, SuccessSlot::Count(None))
    }

    pub fn tag(reply: ReplyKind) -> Self {
        Self::with_slot(reply, SuccessSlot::Tag(None))
    }

    pub fn get() -> Self {
        Self::with_slot(ReplyKind::BasicGetReply, SuccessSlot::Get(None))
    }

    pub fn consume() -> Self {
        let mut pending = Self::tag(ReplyKind::BasicConsumeOk);
        pending.staged_sink = Some(ConsumerSink::new());
        pending
    }

    fn with_slot(reply: ReplyKind, success: SuccessSlot) -> Self {
        Self {
            reply,
            success,
            on_error: None,
            on_finalize: None,
            staged_sink: None,
        }
    }

    fn finalize(&mut self) {
        if let Some(callback) = self.on_finalize.take() {
            callback();
        }
    }

    pub fn succeed_plain(mut self) {
        if let SuccessSlot::Plain(slot) = &mut self.success {
            if let Some(callback) = slot.take() {
                callback();
            }
        }
        self.finalize();
    }

    pub fn succeed_queue(mut self, name: &str, messages: u32, consumers: u32) {
        if let SuccessSlot::Queue(slot) = &mut self.success {
            if let Some(callback) = slot.take() {
                callback(name, messages, consumers);
            }
        }
        self.finalize();
    }

    pub fn succeed_count(mut self, count: u32) {
        if let SuccessSlot::Count(slot) = &mut self.success {
            if let Some(callback) = slot.take() {
                callback(count);
            }
        }
        self.finalize();
    }

    pub fn succeed_tag(mut self, tag: &str) {
        if let SuccessSlot::Tag(slot) = &mut self.success {
            if let Some(callback) = slot.take() {
                callback(tag);
            }
        }
        self.finalize();
    }

    pub fn succeed_get(mut self, message: Option<GetMessage>) {
        if let SuccessSlot::Get(slot) = &mut self.success {
            if let Some(callback) = slot.take() {
                callback(message);
            }
        }
        self.finalize();
    }

    pub fn fail(mut self, error: &AmqpError) {
        if let Some(callback) = self.on_error.take() {
            callback(error);
        }
        self.finalize();
    }
}

/// Handle for a plain round-trip (no success payload).
///
/// Operations sent with `nowait` return an already-settled handle:
/// callbacks installed on it run immediately.
pub struct Deferred<'a> {
    pending: Option<&'a mut Pending>,
}

impl<'a> Deferred<'a> {
    pub(crate) fn new(pending: &'a mut Pending) -> Self {
        Self {
            pending: Some(pending),
        }
    }

    pub(crate) fn settled() -> Self {
        Self { pending: None }
    }

    pub fn on_success(mut self, callback: impl FnOnce() + 'static) -> Self {
        match self.pending.as_deref_mut() {
            Some(pending) => {
                if let SuccessSlot::Plain(slot) = &mut pending.success {
                    *slot = Some(Box::new(callback));
                }
            }
            None => callback(),
        }
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&AmqpError) + 'static) -> Self {
        if let Some(pending) = self.pending.as_deref_mut() {
            pending.on_error = Some(Box::new(callback));
        }
        self
    }

    pub fn on_finalize(mut self, callback: impl FnOnce() + 'static) -> Self {
        match self.pending.as_deref_mut() {
            Some(pending) => pending.on_finalize = Some(Box::new(callback)),
            None => callback(),
        }
        self
    }
}

/// Handle for queue.declare: success carries (name, messages, consumers).
pub struct DeferredQueue<'a> {
    state: QueueState<'a>,
}

enum QueueState<'a> {
    Pending(&'a mut Pending),
    /// nowait declare: the broker sends no reply; success is the
    /// requested name with zero counts.
    Immediate { name: String },
}

impl<'a> DeferredQueue<'a> {
    pub(crate) fn new(pending: &'a mut Pending) -> Self {
        Self {
            state: QueueState::Pending(pending),
        }
    }

    pub(crate) fn settled(name: String) -> Self {
        Self {
            state: QueueState::Immediate { name },
        }
    }

    pub fn on_success(mut self, callback: impl FnOnce(&str, u32, u32) + 'static) -> Self {
        match &mut self.state {
            QueueState::Pending(pending) => {
                if let SuccessSlot::Queue(slot) = &mut pending.success {
                    *slot = Some(Box::new(callback));
                }
            }
            QueueState::Immediate { name } => callback(name, 0, 0),
        }
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&AmqpError) + 'static) -> Self {
        if let QueueState::Pending(pending) = &mut self.state {
            pending.on_error = Some(Box::new(callback));
        }
        self
    }

    pub fn on_finalize(mut self, callback: impl FnOnce() + 'static) -> Self {
        match &mut self.state {
            QueueState::Pending(pending) => pending.on_finalize = Some(Box::new(callback)),
            QueueState::Immediate { .. } => callback(),
        }
        self
    }
}

/// Handle for queue.delete / queue.purge: success carries a message count.
pub struct DeferredDelete<'a> {
    pending: Option<&'a mut Pending>,
}

impl<'a> DeferredDelete<'a> {
    pub(crate) fn new(pending: &'a mut Pending) -> Self {
        Self {
            pending: Some(pending),
        }
    }

    pub(crate) fn settled() -> Self {
        Self { pending: None }
    }

    pub fn on_success(mut self, callback: impl FnOnce(u32) + 'static) -> Self {
        match self.pending.as_deref_mut() {
            Some(pending) => {
                if let SuccessSlot::Count(slot) = &mut pending.success {
                    *slot = Some(Box::new(callback));
                }
            }
            None => callback(0),
        }
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&AmqpError) + 'static) -> Self {
        if let Some(pending) = self.pending.as_deref_mut() {
            pending.on_error = Some(Box::new(callback));
        }
        self
    }

    pub fn on_finalize(mut self, callback: impl FnOnce() + 'static) -> Self {
        match self.pending.as_deref_mut() {
            Some(pending) => pending.on_finalize = Some(Box::new(callback)),
            None => callback(),
        }
        self
    }
}

/// Handle for basic.consume: success carries the confirmed consumer tag,
/// and the delivery/cancel callbacks bind to the consumer's lifetime.
pub struct DeferredConsumer<'a> {
    state: ConsumerState<'a>,
}

enum ConsumerState<'a> {
    Pending(&'a mut Pending),
    /// nowait consume: the sink is already registered under the caller's
    /// tag.
    Immediate {
        tag: String,
        sink: &'a mut ConsumerSink,
    },
}

impl<'a> DeferredConsumer<'a> {
    pub(crate) fn new(pending: &'a mut Pending) -> Self {
        Self {
            state: ConsumerState::Pending(pending),
        }
    }

    pub(crate) fn settled(tag: String, sink: &'a mut ConsumerSink) -> Self {
        Self {
            state: ConsumerState::Immediate { tag, sink },
        }
    }

    pub fn on_success(mut self, callback: impl FnOnce(&str) + 'static) -> Self {
        match &mut self.state {
            ConsumerState::Pending(pending) => {
                if let SuccessSlot::Tag(slot) = &mut pending.success {
                    *slot = Some(Box::new(callback));
                }
            }
            ConsumerState::Immediate { tag, .. } => callback(tag),
        }
        self
    }

    /// Install the delivery callback; fires once per assembled message.
    pub fn on_received(mut self, callback: impl FnMut(Delivery) + 'static) -> Self {
        let sink = match &mut self.state {
            ConsumerState::Pending(pending) => pending.staged_sink.as_mut(),
            ConsumerState::Immediate { sink, .. } => Some(&mut **sink),
        };
        if let Some(sink) = sink {
            sink.on_received = Some(Box::new(callback));
        }
        self
    }

    /// Install the broker-initiated-cancel callback.
    pub fn on_cancelled(mut self, callback: impl FnOnce(&str) + 'static) -> Self {
        let sink = match &mut self.state {
            ConsumerState::Pending(pending) => pending.staged_sink.as_mut(),
            ConsumerState::Immediate { sink, .. } => Some(&mut **sink),
        };
        if let Some(sink) = sink {
            sink.on_cancelled = Some(Box::new(callback));
        }
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&AmqpError) + 'static) -> Self {
        if let ConsumerState::Pending(pending) = &mut self.state {
            pending.on_error = Some(Box::new(callback));
        }
        self
    }

    pub fn on_finalize(mut self, callback: impl FnOnce() + 'static) -> Self {
        match &mut self.state {
            ConsumerState::Pending(pending) => pending.on_finalize = Some(Box::new(callback)),
            ConsumerState::Immediate { .. } => callback(),
        }
        self
    }
}

/// Handle for basic.cancel: success carries the cancelled tag.
pub struct DeferredCancel<'a> {
    state: CancelState<'a>,
}

enum CancelState<'a> {
    Pending(&'a mut Pending),
    Immediate { tag: String },
}

impl<'a> DeferredCancel<'a> {
    pub(crate) fn new(pending: &'a mut Pending) -> Self {
        Self {
            state: CancelState::Pending(pending),
        }
    }

    pub(crate) fn settled(tag: String) -> Self {
        Self {
            state: CancelState::Immediate { tag },
        }
    }

    pub fn on_success(mut self, callback: impl FnOnce(&str) + 'static) -> Self {
        match &mut self.state {
            CancelState::Pending(pending) => {
                if let SuccessSlot::Tag(slot) = &mut pending.success {
                    *slot = Some(Box::new(callback));
                }
            }
            CancelState::Immediate { tag } => callback(tag),
        }
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&AmqpError) + 'static) -> Self {
        if let CancelState::Pending(pending) = &mut self.state {
            pending.on_error = Some(Box::new(callback));
        }
        self
    }

    pub fn on_finalize(mut self, callback: impl FnOnce() + 'static) -> Self {
        match &mut self.state {
            CancelState::Pending(pending) => pending.on_finalize = Some(Box::new(callback)),
            CancelState::Immediate { .. } => callback(),
        }
        self
    }
}

/// Handle for basic.get: success carries the message, or `None` when the
/// queue was empty.
pub struct DeferredGet<'a> {
    pending: &'a mut Pending,
}

impl<'a> DeferredGet<'a> {
    pub(crate) fn new(pending: &'a mut Pending) -> Self {
        Self { pending }
    }

    pub fn on_success(self, callback: impl FnOnce(Option<GetMessage>) + 'static) -> Self {
        if let SuccessSlot::Get(slot) = &mut self.pending.success {
            *slot = Some(Box::new(callback));
        }
        self
    }

    pub fn on_error(self, callback: impl FnOnce(&AmqpError) + 'static) -> Self {
        self.pending.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_finalize(self, callback: impl FnOnce() + 'static) -> Self {
        self.pending.on_finalize = Some(Box::new(callback));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_success_then_finalize_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pending = Pending::plain(ReplyKind::TxSelectOk);

        let (l1, l2) = (log.clone(), log.clone());
        let _ = Deferred::new(&mut pending)
            .on_success(move || l1.borrow_mut().push("success"))
            .on_finalize(move || l2.borrow_mut().push("finalize"));

        pending.succeed_plain();
        assert_eq!(*log.borrow(), vec!["success", "finalize"]);
    }

    #[test]
    fn test_error_then_finalize_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pending = Pending::plain(ReplyKind::TxSelectOk);

        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        let _ = Deferred::new(&mut pending)
            .on_success(move || l1.borrow_mut().push("success"))
            .on_error(move |_| l2.borrow_mut().push("error"))
            .on_finalize(move || l3.borrow_mut().push("finalize"));

        pending.fail(&AmqpError::ChannelClosed);
        assert_eq!(*log.borrow(), vec!["error", "finalize"]);
    }

    #[test]
    fn test_reassignment_replaces_prior_callback() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pending = Pending::plain(ReplyKind::TxSelectOk);

        let (l1, l2) = (log.clone(), log.clone());
        let _ = Deferred::new(&mut pending)
            .on_success(move || l1.borrow_mut().push("first"))
            .on_success(move || l2.borrow_mut().push("second"));

        pending.succeed_plain();
        assert_eq!(*log.borrow(), vec!["second"]);
    }

    #[test]
    fn test_settled_deferred_fires_immediately() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        let _ = Deferred::settled()
            .on_success(move || l1.borrow_mut().push("success"))
            .on_error(move |_| l2.borrow_mut().push("error"))
            .on_finalize(move || l3.borrow_mut().push("finalize"));

        assert_eq!(*log.borrow(), vec!["success", "finalize"]);
    }

    #[test]
    fn test_queue_shape_arguments() {
        let got = Rc::new(RefCell::new((String::new(), 0, 0)));
        let got2 = got.clone();
        let mut pending = Pending::queue();

        let _ = DeferredQueue::new(&mut pending)
            .on_success(move |name, m, c| *got2.borrow_mut() = (name.to_string(), m, c));

        pending.succeed_queue("amq.gen-abc", 7, 2);
        assert_eq!(*got.borrow(), ("amq.gen-abc".to_string(), 7, 2));
    }

    #[test]
    fn test_mismatched_slot_still_finalizes() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pending = Pending::queue();
        let l1 = log.clone();
        pending.on_finalize = Some(Box::new(move || l1.borrow_mut().push("finalize")));

        // A plain resolution against a queue slot drops the payload but
        // must still run finalize.
        pending.succeed_plain();
        assert_eq!(*log.borrow(), vec!["finalize"]);
    }
}
