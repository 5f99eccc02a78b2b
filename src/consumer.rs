//! Consumer sinks - per-tag delivery callbacks.

use crate::message::Delivery;

/// Callback slots bound to one consumer tag.
///
/// Each slot holds at most one callable; re-assignment replaces. The sink
/// lives from basic.consume-ok (or immediately, for no-wait consumes)
/// until basic.cancel-ok, a broker-initiated basic.cancel, or channel
/// close.
#[derive(Default)]
pub(crate) struct ConsumerSink {
    pub on_received: Option<Box<dyn FnMut(Delivery)>>,
    pub on_cancelled: Option<Box<dyn FnOnce(&str)>>,
}

impl ConsumerSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand a fully assembled delivery to the registered callback.
    pub fn deliver(&mut self, delivery: Delivery) {
        if let Some(callback) = self.on_received.as_mut() {
            callback(delivery);
        } else {
            tracing::warn!(
                consumer_tag = %delivery.consumer_tag,
                "delivery dropped: no on_received callback installed"
            );
        }
    }

    /// Fire the cancellation callback, consuming the sink.
    pub fn cancelled(self, tag: &str) {
        if let Some(callback) = self.on_cancelled {
            callback(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Envelope, Message};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn delivery(tag: &str) -> Delivery {
        Delivery {
            message: Message {
                exchange: String::new(),
                routing_key: "q".into(),
                envelope: Envelope::from("x"),
            },
            consumer_tag: tag.to_string(),
            delivery_tag: 1,
            redelivered: false,
        }
    }

    #[test]
    fn test_deliver_invokes_callback_each_time() {
        let seen = Rc::new(RefCell::new(0));
        let seen2 = seen.clone();

        let mut sink = ConsumerSink::new();
        sink.on_received = Some(Box::new(move |_| *seen2.borrow_mut() += 1));

        sink.deliver(delivery("t"));
        sink.deliver(delivery("t"));
        assert_eq!(*seen.borrow(), 2);
    }

    #[test]
    fn test_deliver_without_callback_is_dropped() {
        let mut sink = ConsumerSink::new();
        sink.deliver(delivery("t")); // must not panic
    }

    #[test]
    fn test_cancelled_passes_tag() {
        let got = Rc::new(RefCell::new(String::new()));
        let got2 = got.clone();

        let mut sink = ConsumerSink::new();
        sink.on_cancelled = Some(Box::new(move |tag| *got2.borrow_mut() = tag.to_string()));
        sink.cancelled("amq.ctag-1");

        assert_eq!(*got.borrow(), "amq.ctag-1");
    }
}
