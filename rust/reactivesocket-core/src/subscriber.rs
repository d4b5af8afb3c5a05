//! Application-facing consumer of a stream's inbound items.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Payload, StreamError, StreamId};

/// Receives the items a peer sends on a stream, followed by exactly one
/// terminal signal.
///
/// `on_subscribe` runs first, once. After `on_complete` or `on_error` no
/// further method is called.
///
/// These methods run while the connection is busy with the stream (and, for a
/// [`SharedConnection`](crate::SharedConnection), while its lock is held).
/// Raise demand or cancel through the [`Subscription`], never by calling back
/// into the connection.
pub trait Subscriber {
    fn on_subscribe(&mut self, subscription: Subscription) {
        let _ = subscription;
    }

    fn on_next(&mut self, payload: Payload);

    fn on_complete(&mut self);

    fn on_error(&mut self, error: StreamError);
}

impl<S: Subscriber + ?Sized> Subscriber for Box<S> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        (**self).on_subscribe(subscription)
    }

    fn on_next(&mut self, payload: Payload) {
        (**self).on_next(payload)
    }

    fn on_complete(&mut self) {
        (**self).on_complete()
    }

    fn on_error(&mut self, error: StreamError) {
        (**self).on_error(error)
    }
}

#[derive(Debug, Default)]
struct PendingSignals {
    requested: Vec<u32>,
    cancelled: bool,
}

/// The subscriber's handle for demand and cancellation.
///
/// Calls only record the signal; the stream applies it as soon as the
/// current callback returns, or on the next event the connection processes
/// for it. Outside callbacks,
/// [`ConnectionAutomaton::poll_subscriptions`](crate::ConnectionAutomaton::poll_subscriptions)
/// applies recorded signals right away.
#[derive(Debug, Clone)]
pub struct Subscription {
    stream_id: StreamId,
    pending: Arc<Mutex<PendingSignals>>,
}

impl Subscription {
    pub(crate) fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            pending: Arc::new(Mutex::new(PendingSignals::default())),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Ask the peer for `n` more items.
    pub fn request(&self, n: u32) {
        self.pending.lock().requested.push(n);
    }

    /// Lose interest in the stream.
    pub fn cancel(&self) {
        self.pending.lock().cancelled = true;
    }

    /// Recorded requests, in call order, and whether cancel was called.
    pub(crate) fn take_pending(&self) -> (Vec<u32>, bool) {
        let mut pending = self.pending.lock();
        let requested = std::mem::take(&mut pending.requested);
        let cancelled = std::mem::take(&mut pending.cancelled);
        (requested, cancelled)
    }
}

/// A subscriber that logs every signal it receives.
///
/// It requests `u32::MAX` items on subscribe, so the peer is never held back.
/// Useful for demos and for wiring up a stream before the real consumer
/// exists.
#[derive(Debug, Default)]
pub struct TracingSubscriber {
    name: String,
    received: u64,
}

impl TracingSubscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: 0,
        }
    }

    /// Number of items seen so far.
    pub fn received(&self) -> u64 {
        self.received
    }
}

impl Subscriber for TracingSubscriber {
    fn on_subscribe(&mut self, subscription: Subscription) {
        tracing::info!(
            subscriber = %self.name,
            stream_id = subscription.stream_id(),
            "on_subscribe"
        );
        subscription.request(u32::MAX);
    }

    fn on_next(&mut self, payload: Payload) {
        self.received += 1;
        tracing::info!(
            subscriber = %self.name,
            data = %String::from_utf8_lossy(&payload.data),
            "on_next"
        );
    }

    fn on_complete(&mut self) {
        tracing::info!(subscriber = %self.name, received = self.received, "on_complete");
    }

    fn on_error(&mut self, error: StreamError) {
        tracing::info!(subscriber = %self.name, %error, "on_error");
    }
}
