//! Credit accounting shared by stream state machines.
//!
//! [`FlowControl`] keeps two ledgers for one stream:
//!
//! - **consumer demand**: how many inbound items the local subscriber asked
//!   for. Raised by [`FlowControl::request`], which also advertises the
//!   credit to the peer with a REQUEST_N frame.
//! - **producer credit**: how many outbound items the peer allows us to send.
//!   Raised by inbound REQUEST_N frames. Items offered without credit wait in
//!   a FIFO queue.
//!
//! It also owns the subscriber and its [`Subscription`], and guarantees the
//! subscriber observes exactly one terminal signal, however many times
//! [`FlowControl::end_stream`] runs.

use std::collections::VecDeque;

use crate::{
    Frame, Payload, RequestNFrame, ResponseFrame, StreamCompletionSignal, StreamError, StreamId,
    Subscriber, Subscription,
};

pub struct FlowControl<S> {
    stream_id: StreamId,
    /// Taken on the first `end_stream`.
    consumer: Option<S>,
    /// Shared with the consumer once it is subscribed.
    subscription: Subscription,
    subscribed: bool,
    /// Inbound items requested by the consumer but not yet delivered.
    demand: u64,
    /// Outbound items the peer allows us to send.
    credit: u64,
    /// Outbound items waiting for credit.
    pending: VecDeque<Payload>,
    /// Error to hand the consumer instead of a generic terminated error.
    terminal_error: Option<StreamError>,
}

impl<S: Subscriber> FlowControl<S> {
    pub fn new(stream_id: StreamId, consumer: S, initial_credit: u32) -> Self {
        Self {
            stream_id,
            consumer: Some(consumer),
            subscription: Subscription::new(stream_id),
            subscribed: false,
            demand: 0,
            credit: u64::from(initial_credit),
            pending: VecDeque::new(),
            terminal_error: None,
        }
    }

    /// Outstanding consumer demand.
    pub fn demand(&self) -> u64 {
        self.demand
    }

    /// Remaining credit for outbound items.
    pub fn credit(&self) -> u64 {
        self.credit
    }

    /// Outbound items queued until the peer grants credit.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// True once the consumer has received its terminal signal.
    pub fn is_ended(&self) -> bool {
        self.consumer.is_none()
    }

    /// Borrow the consumer, if the stream has not ended.
    pub fn consumer(&self) -> Option<&S> {
        self.consumer.as_ref()
    }

    /// The handle the consumer uses to signal demand and cancellation.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Hand the consumer its subscription. Returns false if it already has
    /// one or the stream has ended.
    pub fn subscribe(&mut self) -> bool {
        if self.subscribed {
            return false;
        }
        let Some(consumer) = self.consumer.as_mut() else {
            return false;
        };
        self.subscribed = true;
        consumer.on_subscribe(self.subscription.clone());
        true
    }

    /// Raise consumer demand by `n`, returning the REQUEST_N frame that
    /// advertises it to the peer.
    pub fn request(&mut self, n: u32) -> Option<Frame> {
        if n == 0 {
            tracing::warn!(stream_id = self.stream_id, "request(0) ignored");
            return None;
        }
        self.demand = self.demand.saturating_add(u64::from(n));
        tracing::trace!(stream_id = self.stream_id, n, demand = self.demand, "request");
        Some(RequestNFrame::new(self.stream_id, n).into())
    }

    /// Offer one outbound item. Returns the RESPONSE frame to send if credit
    /// is available; otherwise the item is queued.
    pub fn on_next(&mut self, payload: Payload) -> Option<Frame> {
        if self.credit == 0 || !self.pending.is_empty() {
            self.pending.push_back(payload);
            tracing::trace!(
                stream_id = self.stream_id,
                pending = self.pending.len(),
                "no credit, item queued"
            );
            return None;
        }
        self.credit -= 1;
        Some(ResponseFrame::next(self.stream_id, payload).into())
    }

    /// Add credit granted by the peer and release queued items it covers, in
    /// order.
    pub fn on_request_n(&mut self, n: u32) -> Vec<Frame> {
        self.credit = self.credit.saturating_add(u64::from(n));
        let mut released = Vec::new();
        while self.credit > 0 {
            let Some(payload) = self.pending.pop_front() else {
                break;
            };
            self.credit -= 1;
            released.push(ResponseFrame::next(self.stream_id, payload).into());
        }
        tracing::trace!(
            stream_id = self.stream_id,
            n,
            released = released.len(),
            credit = self.credit,
            "credit granted"
        );
        released
    }

    /// Deliver the payload of the opening frame. It comes with the channel
    /// itself, so it does not count against demand.
    pub fn on_open_frame(&mut self, payload: Payload) {
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.on_next(payload);
        }
    }

    /// Deliver one inbound item to the consumer.
    pub fn on_next_frame(&mut self, payload: Payload) {
        let Some(consumer) = self.consumer.as_mut() else {
            return;
        };
        if self.demand == 0 {
            tracing::warn!(
                stream_id = self.stream_id,
                "peer sent an item without outstanding demand"
            );
        } else {
            self.demand -= 1;
        }
        consumer.on_next(payload);
    }

    /// Remember the error the consumer should see when the stream ends.
    pub fn set_terminal_error(&mut self, error: StreamError) {
        self.terminal_error = Some(error);
    }

    /// Notify the consumer that the stream ended. Only the first call has an
    /// effect.
    pub fn end_stream(&mut self, signal: StreamCompletionSignal) {
        let Some(mut consumer) = self.consumer.take() else {
            return;
        };
        if !self.pending.is_empty() {
            tracing::debug!(
                stream_id = self.stream_id,
                dropped = self.pending.len(),
                "discarding items queued without credit"
            );
            self.pending.clear();
        }
        match signal {
            StreamCompletionSignal::Graceful => consumer.on_complete(),
            other => {
                let error = self
                    .terminal_error
                    .take()
                    .unwrap_or_else(|| other.into());
                consumer.on_error(error);
            }
        }
    }
}

impl<S> std::fmt::Debug for FlowControl<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowControl")
            .field("stream_id", &self.stream_id)
            .field("ended", &self.consumer.is_none())
            .field("subscribed", &self.subscribed)
            .field("demand", &self.demand)
            .field("credit", &self.credit)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;

    fn data_of(frame: &Frame) -> &[u8] {
        match frame {
            Frame::Response(f) => &f.payload.data,
            other => panic!("expected RESPONSE, got {other:?}"),
        }
    }

    #[test]
    fn request_emits_request_n() {
        let mut fc = FlowControl::new(1, Recorder::new(), 0);
        let frame = fc.request(5).expect("frame");
        assert_eq!(frame, Frame::RequestN(RequestNFrame::new(1, 5)));
        assert_eq!(fc.demand(), 5);
    }

    #[test]
    fn request_zero_is_ignored() {
        let mut fc = FlowControl::new(1, Recorder::new(), 0);
        assert!(fc.request(0).is_none());
        assert_eq!(fc.demand(), 0);
    }

    #[test]
    fn demand_saturates() {
        let mut fc = FlowControl::new(1, Recorder::new(), 0);
        for _ in 0..4 {
            fc.request(u32::MAX);
        }
        assert_eq!(fc.demand(), 4 * u64::from(u32::MAX));
    }

    #[test]
    fn on_next_uses_credit_then_queues() {
        let mut fc = FlowControl::new(1, Recorder::new(), 1);
        assert!(fc.on_next(Payload::from("a")).is_some());
        assert!(fc.on_next(Payload::from("b")).is_none());
        assert!(fc.on_next(Payload::from("c")).is_none());
        assert_eq!(fc.pending_len(), 2);

        let released = fc.on_request_n(1);
        assert_eq!(released.len(), 1);
        assert_eq!(data_of(&released[0]), b"b");

        let released = fc.on_request_n(10);
        assert_eq!(released.len(), 1);
        assert_eq!(data_of(&released[0]), b"c");
        assert_eq!(fc.credit(), 9);
    }

    #[test]
    fn queued_items_keep_order_behind_new_credit() {
        let mut fc = FlowControl::new(1, Recorder::new(), 0);
        assert!(fc.on_next(Payload::from("a")).is_none());
        let released = fc.on_request_n(2);
        assert_eq!(released.len(), 1);
        // Credit remains, queue is empty: sent directly.
        let frame = fc.on_next(Payload::from("b")).expect("frame");
        assert_eq!(data_of(&frame), b"b");
    }

    #[test]
    fn inbound_items_reach_consumer() {
        let recorder = Recorder::new();
        let mut fc = FlowControl::new(1, recorder.clone(), 0);
        fc.request(2);
        fc.on_next_frame(Payload::from("x"));
        fc.on_next_frame(Payload::from("y"));
        // Beyond demand: still delivered.
        fc.on_next_frame(Payload::from("z"));
        assert_eq!(fc.demand(), 0);
        assert!(fc.consumer().is_some());
        recorder.with(|rec| assert_eq!(rec.items.len(), 3));
    }

    #[test]
    fn opening_payload_does_not_use_demand() {
        let recorder = Recorder::new();
        let mut fc = FlowControl::new(1, recorder.clone(), 0);
        fc.request(1);
        fc.on_open_frame(Payload::from("open"));
        assert_eq!(fc.demand(), 1);
        fc.on_next_frame(Payload::from("x"));
        assert_eq!(fc.demand(), 0);
        recorder.with(|rec| assert_eq!(rec.items.len(), 2));
    }

    #[test]
    fn subscribe_runs_once() {
        let recorder = Recorder::requesting(4);
        let mut fc = FlowControl::new(1, recorder.clone(), 0);
        assert!(fc.subscribe());
        assert!(!fc.subscribe());
        assert_eq!(fc.subscription().take_pending(), (vec![4], false));
        recorder.with(|rec| assert_eq!(rec.subscriptions, 1));
    }

    #[test]
    fn end_stream_notifies_once() {
        let recorder = Recorder::new();
        let mut fc = FlowControl::new(1, recorder.clone(), 0);
        fc.end_stream(StreamCompletionSignal::Graceful);
        assert!(fc.is_ended());
        fc.end_stream(StreamCompletionSignal::ConnectionError);
        fc.on_next_frame(Payload::from("late"));
        assert!(fc.consumer().is_none());
        recorder.with(|rec| {
            assert_eq!(rec.completions, 1);
            assert!(rec.errors.is_empty());
            assert!(rec.items.is_empty());
        });
    }

    #[test]
    fn end_stream_prefers_terminal_error() {
        let recorder = Recorder::new();
        let mut fc = FlowControl::new(1, recorder.clone(), 0);
        fc.set_terminal_error(StreamError::application("peer gone"));
        fc.on_next(Payload::from("queued"));
        fc.end_stream(StreamCompletionSignal::Error);
        fc.end_stream(StreamCompletionSignal::Error);

        recorder.with(|rec| {
            assert_eq!(rec.completions, 0);
            assert_eq!(rec.errors, vec![StreamError::application("peer gone")]);
        });
        assert_eq!(fc.pending_len(), 0);
    }
}
