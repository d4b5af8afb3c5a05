//! Responder side of a REQUEST_CHANNEL interaction.
//!
//! A [`ChannelResponder`] turns application signals into outbound frames and
//! inbound frames into application signals for one stream. It never talks to
//! the connection directly: every transition returns the [`Effect`]s the
//! connection must carry out, in order.
//!
//! ```text
//!               on_complete / on_error / cancel
//!               inbound CANCEL / ERROR / REQUEST_CHANNEL+COMPLETE
//!               end_stream(non-graceful)
//!  RESPONDING ─────────────────────────────────────────────▶ CLOSED
//!       │                                                      ▲
//!       │ on_complete with items                               │ queue drained
//!       │ still waiting for credit                             │ (RESPONSE+COMPLETE)
//!       └──────────────────────▶ COMPLETING ───────────────────┘
//! ```
//!
//! CLOSED is absorbing. Once there, every event is ignored except
//! [`ChannelResponder::end_stream`], which the connection calls after
//! deregistering the stream and which hands the consumer its terminal signal.
//!
//! COMPLETING only exists while the producer's last items wait for credit:
//! producer calls are ignored, the consumer side and inbound frames behave as
//! in RESPONDING, and the COMPLETE frame goes out right after the last queued
//! item.

use core::fmt;

use crate::{
    ErrorFrame, FlowControl, Frame, Payload, RequestChannelFrame, ResponseFrame,
    StreamCompletionSignal, StreamError, StreamId, Subscriber,
};

/// Lifecycle state of a channel responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Responding,
    /// The producer completed; queued items are still waiting for credit.
    Completing,
    Closed,
}

/// Something the connection must do on behalf of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Queue a frame for the transport.
    SendFrame(Frame),
    /// Deregister the stream, then call its `end_stream` with the signal.
    EndStream(StreamCompletionSignal),
}

/// Input to [`ChannelResponder::apply`].
#[derive(Debug, Clone)]
pub enum Event {
    /// The peer's opening REQUEST_CHANNEL frame.
    Open(RequestChannelFrame),
    /// The local producer emits an item.
    Next(Payload),
    /// The local producer completes.
    Complete,
    /// The local producer fails.
    Error(StreamError),
    /// The local consumer wants `n` more items.
    Request(u32),
    /// The local consumer loses interest.
    Cancel,
    /// A frame arrived from the peer.
    Frame(Frame),
    /// The connection ends the stream.
    EndStream(StreamCompletionSignal),
}

pub struct ChannelResponder<S> {
    connection_id: u64,
    stream_id: StreamId,
    state: ResponderState,
    base: FlowControl<S>,
}

impl<S: Subscriber> ChannelResponder<S> {
    /// Create a responder in the RESPONDING state.
    ///
    /// `initial_credit` is the `request_n` of the opening REQUEST_CHANNEL
    /// frame: how many items the peer is ready to receive.
    pub fn new(connection_id: u64, stream_id: StreamId, consumer: S, initial_credit: u32) -> Self {
        let responder = Self {
            connection_id,
            stream_id,
            state: ResponderState::Responding,
            base: FlowControl::new(stream_id, consumer, initial_credit),
        };
        tracing::debug!(responder = %responder, initial_credit, "created");
        responder
    }

    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[inline]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    #[inline]
    pub fn state(&self) -> ResponderState {
        self.state
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == ResponderState::Closed
    }

    /// Credit and demand bookkeeping for this stream.
    pub fn flow_control(&self) -> &FlowControl<S> {
        &self.base
    }

    /// Subscribe the consumer and deliver the opening frame's payload.
    pub fn open(&mut self, initial: RequestChannelFrame) -> Vec<Effect> {
        self.apply(Event::Open(initial))
    }

    pub fn on_next(&mut self, payload: Payload) -> Vec<Effect> {
        self.apply(Event::Next(payload))
    }

    pub fn on_complete(&mut self) -> Vec<Effect> {
        self.apply(Event::Complete)
    }

    pub fn on_error(&mut self, error: StreamError) -> Vec<Effect> {
        self.apply(Event::Error(error))
    }

    pub fn request(&mut self, n: u32) -> Vec<Effect> {
        self.apply(Event::Request(n))
    }

    pub fn cancel(&mut self) -> Vec<Effect> {
        self.apply(Event::Cancel)
    }

    /// Handle a frame the connection routed to this stream.
    pub fn on_frame(&mut self, frame: Frame) -> Vec<Effect> {
        self.apply(Event::Frame(frame))
    }

    /// Apply demand and cancellation the consumer recorded on its
    /// [`Subscription`](crate::Subscription) outside of a callback.
    pub fn poll_subscription(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.drain_subscription(&mut effects);
        effects
    }

    /// End the stream from outside.
    ///
    /// While the stream is open the signal must not be graceful: a graceful
    /// end is always decided by the responder itself. The consumer is notified
    /// once, no matter how often this runs.
    pub fn end_stream(&mut self, signal: StreamCompletionSignal) {
        if self.state != ResponderState::Closed {
            debug_assert!(
                !signal.is_graceful(),
                "{self}: graceful end_stream while responding"
            );
            if signal.is_graceful() {
                tracing::error!(responder = %self, "graceful end_stream while responding");
            }
            self.state = ResponderState::Closed;
        }
        tracing::debug!(responder = %self, %signal, "end_stream");
        self.base.end_stream(signal);
    }

    /// Run one transition, then apply whatever the consumer signalled on its
    /// subscription during it.
    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        if let Event::EndStream(signal) = event {
            self.end_stream(signal);
            return Vec::new();
        }

        if self.is_closed() {
            tracing::trace!(responder = %self, ?event, "ignored after close");
            return Vec::new();
        }

        let mut effects = Vec::new();
        self.transition(event, &mut effects);
        self.drain_subscription(&mut effects);
        effects
    }

    fn transition(&mut self, event: Event, effects: &mut Vec<Effect>) {
        use ResponderState::*;

        match (self.state, event) {
            (Closed, _) | (_, Event::EndStream(_)) => {}
            (_, Event::Open(frame)) => self.on_open(frame, effects),
            (_, Event::Request(n)) => {
                if let Some(frame) = self.base.request(n) {
                    effects.push(Effect::SendFrame(frame));
                }
            }
            (_, Event::Cancel) => {
                self.state = Closed;
                tracing::debug!(responder = %self, "cancelling");
                let frame = ResponseFrame::complete(self.stream_id);
                terminate(effects, frame.into(), StreamCompletionSignal::Graceful);
            }
            (_, Event::Frame(frame)) => self.on_inbound(frame, effects),
            (Responding, Event::Next(payload)) => {
                if let Some(frame) = self.base.on_next(payload) {
                    effects.push(Effect::SendFrame(frame));
                }
            }
            (Responding, Event::Complete) => {
                if self.base.pending_len() == 0 {
                    self.complete(effects);
                } else {
                    self.state = Completing;
                    tracing::debug!(
                        responder = %self,
                        pending = self.base.pending_len(),
                        "completion deferred until queued items are sent"
                    );
                }
            }
            (Responding, Event::Error(error)) => {
                self.state = Closed;
                tracing::debug!(responder = %self, %error, "failing");
                let frame = ErrorFrame::application(self.stream_id, error.to_string());
                terminate(effects, frame.into(), StreamCompletionSignal::Error);
            }
            (Completing, event) => {
                tracing::trace!(responder = %self, ?event, "producer already completed");
            }
        }
    }

    fn complete(&mut self, effects: &mut Vec<Effect>) {
        self.state = ResponderState::Closed;
        tracing::debug!(responder = %self, "completing");
        let frame = ResponseFrame::complete(self.stream_id);
        terminate(effects, frame.into(), StreamCompletionSignal::Graceful);
    }

    fn on_open(&mut self, frame: RequestChannelFrame, effects: &mut Vec<Effect>) {
        if !self.base.subscribe() {
            tracing::warn!(responder = %self, "stream already opened, frame ignored");
            return;
        }
        let complete = frame.is_complete();
        if complete {
            self.state = ResponderState::Closed;
        }
        self.base.on_open_frame(frame.payload);
        if complete {
            tracing::debug!(responder = %self, "peer completed on open");
            effects.push(Effect::EndStream(StreamCompletionSignal::Graceful));
        }
    }

    fn on_inbound(&mut self, frame: Frame, effects: &mut Vec<Effect>) {
        match frame {
            Frame::RequestChannel(frame) => {
                let complete = frame.is_complete();
                if complete {
                    self.state = ResponderState::Closed;
                }
                tracing::trace!(responder = %self, complete, "inbound item");
                self.base.on_next_frame(frame.payload);
                if complete {
                    tracing::debug!(responder = %self, "peer completed");
                    effects.push(Effect::EndStream(StreamCompletionSignal::Graceful));
                }
            }
            Frame::Cancel(_) => {
                self.state = ResponderState::Closed;
                tracing::debug!(responder = %self, "peer cancelled");
                effects.push(Effect::EndStream(StreamCompletionSignal::Graceful));
            }
            Frame::RequestN(frame) => {
                effects.extend(
                    self.base
                        .on_request_n(frame.request_n)
                        .into_iter()
                        .map(Effect::SendFrame),
                );
                if self.state == ResponderState::Completing && self.base.pending_len() == 0 {
                    self.complete(effects);
                }
            }
            Frame::Error(frame) => {
                self.state = ResponderState::Closed;
                let message = frame.message();
                tracing::debug!(
                    responder = %self,
                    code = %frame.error_code,
                    %message,
                    "peer failed"
                );
                self.base.set_terminal_error(StreamError::Remote {
                    code: frame.error_code,
                    message,
                });
                effects.push(Effect::EndStream(StreamCompletionSignal::Error));
            }
            other => {
                tracing::warn!(
                    responder = %self,
                    header = %other.header(),
                    "unexpected frame ignored"
                );
            }
        }
    }

    fn drain_subscription(&mut self, effects: &mut Vec<Effect>) {
        let (requested, cancelled) = self.base.subscription().take_pending();
        if requested.is_empty() && !cancelled {
            return;
        }
        if self.is_closed() {
            tracing::trace!(responder = %self, "subscription signals after close ignored");
            return;
        }
        for n in requested {
            self.transition(Event::Request(n), effects);
        }
        if cancelled {
            self.transition(Event::Cancel, effects);
        }
    }
}

/// A terminal frame is always followed by the end request.
fn terminate(effects: &mut Vec<Effect>, frame: Frame, signal: StreamCompletionSignal) {
    effects.push(Effect::SendFrame(frame));
    effects.push(Effect::EndStream(signal));
}

impl<S> fmt::Display for ChannelResponder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelResponder({}, {})", self.connection_id, self.stream_id)
    }
}

impl<S> fmt::Debug for ChannelResponder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelResponder")
            .field("connection_id", &self.connection_id)
            .field("stream_id", &self.stream_id)
            .field("state", &self.state)
            .field("base", &self.base)
            .finish()
    }
}
