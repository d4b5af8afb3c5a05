//! Thread-safe handle to a connection.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    ConnectionAutomaton, ConnectionConfig, ConnectionError, Frame, Payload, RequestChannelFrame,
    StreamCompletionSignal, StreamError, StreamId, Subscriber,
};

/// A [`ConnectionAutomaton`] behind a mutex, cloneable across threads.
///
/// The reader thread feeding inbound frames and application threads calling
/// `on_next`/`on_complete`/`cancel` all serialize on the same lock, so each
/// transition sees the state the previous one left behind.
///
/// Subscribers run with the lock held. Calling back into the same
/// `SharedConnection` from `on_next` would deadlock; use the
/// [`Subscription`](crate::Subscription) instead.
pub struct SharedConnection<S> {
    inner: Arc<Mutex<ConnectionAutomaton<S>>>,
}

impl<S> Clone for SharedConnection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Subscriber> SharedConnection<S> {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::from_automaton(ConnectionAutomaton::new(config))
    }

    pub fn from_automaton(automaton: ConnectionAutomaton<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(automaton)),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.inner.lock().connection_id()
    }

    pub fn register_channel(
        &self,
        initial: RequestChannelFrame,
        subscriber: S,
    ) -> Result<(), ConnectionError> {
        self.inner.lock().register_channel(initial, subscriber)
    }

    pub fn accept(&self, frame: Frame, subscriber: S) -> Result<(), ConnectionError> {
        self.inner.lock().accept(frame, subscriber)
    }

    pub fn on_frame(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.inner.lock().on_frame(frame)
    }

    pub fn on_next(&self, stream_id: StreamId, payload: Payload) {
        self.inner.lock().on_next(stream_id, payload);
    }

    pub fn on_complete(&self, stream_id: StreamId) {
        self.inner.lock().on_complete(stream_id);
    }

    pub fn on_error(&self, stream_id: StreamId, error: StreamError) {
        self.inner.lock().on_error(stream_id, error);
    }

    pub fn request(&self, stream_id: StreamId, n: u32) {
        self.inner.lock().request(stream_id, n);
    }

    pub fn cancel(&self, stream_id: StreamId) {
        self.inner.lock().cancel(stream_id);
    }

    pub fn end_stream(&self, stream_id: StreamId, signal: StreamCompletionSignal) {
        self.inner.lock().end_stream(stream_id, signal);
    }

    pub fn disconnect(&self, signal: StreamCompletionSignal) {
        self.inner.lock().disconnect(signal);
    }

    pub fn poll_frame(&self) -> Option<Frame> {
        self.inner.lock().poll_frame()
    }

    pub fn take_pending_frames(&self) -> Vec<Frame> {
        self.inner.lock().take_pending_frames()
    }

    pub fn stream_count(&self) -> usize {
        self.inner.lock().stream_count()
    }

    pub fn contains_stream(&self, stream_id: StreamId) -> bool {
        self.inner.lock().contains_stream(stream_id)
    }

    /// See [`ConnectionAutomaton::poll_subscriptions`].
    pub fn poll_subscriptions(&self) {
        self.inner.lock().poll_subscriptions();
    }
}

impl<S> std::fmt::Debug for SharedConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedConnection").field(&*self.inner.lock()).finish()
    }
}
