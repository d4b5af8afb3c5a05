//! Connection-wide stream multiplexing.
//!
//! A [`ConnectionAutomaton`] owns every open channel of one connection. It
//! routes inbound frames to the right [`ChannelResponder`], carries out the
//! effects each transition returns, and keeps the outbound frames in a queue
//! that the transport drains with [`ConnectionAutomaton::poll_frame`].
//!
//! The automaton does no I/O. Whoever owns the transport feeds it decoded
//! frames and writes out what it queues.
//!
//! # Stream ends
//!
//! A stream leaves the table in exactly one place, [`ConnectionAutomaton::end_stream`]:
//! first it is deregistered, then the responder is told to end, which hands
//! its subscriber the terminal signal. Operations addressed to a stream that
//! is no longer registered are ignored.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    ChannelResponder, ConnectionConfig, ConnectionError, Effect, Event, Frame, Payload,
    RequestChannelFrame, StreamCompletionSignal, StreamError, StreamId, Subscriber,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub struct ConnectionAutomaton<S> {
    connection_id: u64,
    config: ConnectionConfig,
    streams: HashMap<StreamId, ChannelResponder<S>>,
    /// Frames waiting for the transport, in emission order.
    outbound: VecDeque<Frame>,
    closed: bool,
}

impl<S: Subscriber> ConnectionAutomaton<S> {
    pub fn new(config: ConnectionConfig) -> Self {
        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            connection_id,
            max_streams = config.max_streams,
            initial_request_n = config.initial_request_n,
            "connection created"
        );
        Self {
            connection_id,
            config,
            streams: HashMap::new(),
            outbound: VecDeque::new(),
            closed: false,
        }
    }

    /// Process-unique id, used in log prefixes.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn contains_stream(&self, stream_id: StreamId) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Ids of the open streams, sorted.
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn responder(&self, stream_id: StreamId) -> Option<&ChannelResponder<S>> {
        self.streams.get(&stream_id)
    }

    /// Open a channel for a peer's REQUEST_CHANNEL frame.
    ///
    /// The frame's `request_n` becomes the responder's initial credit.
    /// `subscriber` receives its [`Subscription`](crate::Subscription), then the
    /// frame's payload, right away. The configured `initial_request_n` is
    /// requested after that. If the frame already carries COMPLETE, the stream
    /// ends before this returns.
    pub fn register_channel(
        &mut self,
        initial: RequestChannelFrame,
        subscriber: S,
    ) -> Result<(), ConnectionError> {
        let stream_id = initial.header.stream_id;
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        if stream_id == 0 {
            return Err(ConnectionError::ReservedStreamId);
        }
        if self.streams.contains_key(&stream_id) {
            return Err(ConnectionError::DuplicateStream { stream_id });
        }
        if !self.config.admits(self.streams.len()) {
            tracing::warn!(
                connection_id = self.connection_id,
                stream_id,
                max = self.config.max_streams,
                "rejecting channel, stream limit reached"
            );
            return Err(ConnectionError::StreamLimit {
                max: self.config.max_streams,
            });
        }

        let responder =
            ChannelResponder::new(self.connection_id, stream_id, subscriber, initial.request_n);
        self.streams.insert(stream_id, responder);

        self.dispatch(stream_id, Event::Open(initial));
        if self.config.initial_request_n > 0 && self.streams.contains_key(&stream_id) {
            self.dispatch(stream_id, Event::Request(self.config.initial_request_n));
        }
        Ok(())
    }

    /// Like [`register_channel`](Self::register_channel), for a frame of not
    /// yet known type.
    pub fn accept(&mut self, frame: Frame, subscriber: S) -> Result<(), ConnectionError> {
        match frame {
            Frame::RequestChannel(initial) => self.register_channel(initial, subscriber),
            other => Err(ConnectionError::UnexpectedFrame {
                stream_id: other.stream_id(),
                frame_type: other.frame_type(),
            }),
        }
    }

    /// Route an inbound frame to its stream.
    ///
    /// Frames for streams that are not open are dropped.
    pub fn on_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        let stream_id = frame.stream_id();
        if stream_id == 0 {
            return Err(ConnectionError::ReservedStreamId);
        }
        if !self.streams.contains_key(&stream_id) {
            tracing::debug!(
                connection_id = self.connection_id,
                stream_id,
                header = %frame.header(),
                "dropping frame for unknown stream"
            );
            return Ok(());
        }
        self.dispatch(stream_id, Event::Frame(frame));
        Ok(())
    }

    pub fn on_next(&mut self, stream_id: StreamId, payload: Payload) {
        self.dispatch(stream_id, Event::Next(payload));
    }

    pub fn on_complete(&mut self, stream_id: StreamId) {
        self.dispatch(stream_id, Event::Complete);
    }

    pub fn on_error(&mut self, stream_id: StreamId, error: StreamError) {
        self.dispatch(stream_id, Event::Error(error));
    }

    pub fn request(&mut self, stream_id: StreamId, n: u32) {
        self.dispatch(stream_id, Event::Request(n));
    }

    pub fn cancel(&mut self, stream_id: StreamId) {
        self.dispatch(stream_id, Event::Cancel);
    }

    /// Apply demand and cancellation that subscribers recorded on their
    /// subscriptions since the last event on their stream.
    pub fn poll_subscriptions(&mut self) {
        for stream_id in self.stream_ids() {
            let Some(responder) = self.streams.get_mut(&stream_id) else {
                continue;
            };
            let effects = responder.poll_subscription();
            self.execute(stream_id, effects);
        }
    }

    /// Deregister a stream and tell it to end.
    ///
    /// Ending a stream that is still responding with a graceful signal
    /// violates the responder's contract.
    pub fn end_stream(&mut self, stream_id: StreamId, signal: StreamCompletionSignal) {
        let Some(mut responder) = self.streams.remove(&stream_id) else {
            tracing::trace!(
                connection_id = self.connection_id,
                stream_id,
                "end_stream for unknown stream"
            );
            return;
        };
        tracing::debug!(
            connection_id = self.connection_id,
            stream_id,
            %signal,
            remaining = self.streams.len(),
            "stream deregistered"
        );
        responder.end_stream(signal);
    }

    /// Tear down the connection, ending every open stream with `signal`.
    ///
    /// A graceful signal is replaced by `ConnectionEnd`: open streams cannot
    /// be ended gracefully from outside.
    pub fn disconnect(&mut self, signal: StreamCompletionSignal) {
        let signal = if signal.is_graceful() {
            tracing::warn!(
                connection_id = self.connection_id,
                "graceful disconnect signal replaced by connection end"
            );
            StreamCompletionSignal::ConnectionEnd
        } else {
            signal
        };
        self.closed = true;
        let ids = self.stream_ids();
        tracing::debug!(
            connection_id = self.connection_id,
            %signal,
            open_streams = ids.len(),
            "disconnecting"
        );
        for stream_id in ids {
            self.end_stream(stream_id, signal);
        }
    }

    /// Close after the transport went away.
    pub fn close(&mut self) {
        self.disconnect(StreamCompletionSignal::ConnectionEnd);
    }

    /// Next outbound frame, if any.
    pub fn poll_frame(&mut self) -> Option<Frame> {
        self.outbound.pop_front()
    }

    /// All queued outbound frames, oldest first.
    pub fn take_pending_frames(&mut self) -> Vec<Frame> {
        self.outbound.drain(..).collect()
    }

    pub fn has_pending_frames(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn dispatch(&mut self, stream_id: StreamId, event: Event) {
        let Some(responder) = self.streams.get_mut(&stream_id) else {
            tracing::trace!(
                connection_id = self.connection_id,
                stream_id,
                ?event,
                "ignoring event for unknown stream"
            );
            return;
        };
        let effects = responder.apply(event);
        self.execute(stream_id, effects);
    }

    fn execute(&mut self, stream_id: StreamId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SendFrame(frame) => {
                    tracing::trace!(
                        connection_id = self.connection_id,
                        header = %frame.header(),
                        "queued frame"
                    );
                    self.outbound.push_back(frame);
                }
                Effect::EndStream(signal) => self.end_stream(stream_id, signal),
            }
        }
    }
}

impl<S> std::fmt::Debug for ConnectionAutomaton<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAutomaton")
            .field("connection_id", &self.connection_id)
            .field("config", &self.config)
            .field("streams", &self.streams.len())
            .field("outbound", &self.outbound.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;
    use crate::{CancelFrame, ErrorFrame, FrameFlags, FrameType, RequestNFrame, ResponseFrame};

    fn open(
        conn: &mut ConnectionAutomaton<Recorder>,
        stream_id: StreamId,
        request_n: u32,
    ) -> Recorder {
        let recorder = Recorder::new();
        let flags = FrameFlags::empty();
        let initial = RequestChannelFrame::new(stream_id, flags, request_n, Payload::from("hi"));
        conn.register_channel(initial, recorder.clone())
            .expect("register");
        recorder
    }

    #[test]
    fn register_delivers_initial_payload() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let rec = open(&mut conn, 1, 0);
        assert!(conn.contains_stream(1));
        assert_eq!(conn.stream_count(), 1);
        rec.with(|rec| assert_eq!(rec.items, vec![Payload::from("hi")]));
        assert!(!conn.has_pending_frames());
    }

    #[test]
    fn initial_request_n_is_advertised() {
        let config = ConnectionConfig::default().with_initial_request_n(8);
        let mut conn = ConnectionAutomaton::new(config);
        open(&mut conn, 1, 0);
        assert_eq!(
            conn.take_pending_frames(),
            vec![Frame::from(RequestNFrame::new(1, 8))]
        );
    }

    #[test]
    fn register_rejects_bad_ids() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        open(&mut conn, 3, 0);

        let dup = RequestChannelFrame::new(3, FrameFlags::empty(), 0, Payload::empty());
        assert_eq!(
            conn.register_channel(dup, Recorder::new()),
            Err(ConnectionError::DuplicateStream { stream_id: 3 })
        );

        let zero = RequestChannelFrame::new(0, FrameFlags::empty(), 0, Payload::empty());
        assert_eq!(
            conn.register_channel(zero, Recorder::new()),
            Err(ConnectionError::ReservedStreamId)
        );
    }

    #[test]
    fn register_respects_stream_limit() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default().with_max_streams(1));
        open(&mut conn, 1, 0);
        let frame = RequestChannelFrame::new(3, FrameFlags::empty(), 0, Payload::empty());
        assert_eq!(
            conn.register_channel(frame, Recorder::new()),
            Err(ConnectionError::StreamLimit { max: 1 })
        );

        conn.cancel(1);
        let frame = RequestChannelFrame::new(3, FrameFlags::empty(), 0, Payload::empty());
        assert!(conn.register_channel(frame, Recorder::new()).is_ok());
    }

    #[test]
    fn accept_requires_request_channel() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let err = conn
            .accept(CancelFrame::new(5).into(), Recorder::new())
            .unwrap_err();
        assert_eq!(
            err,
            ConnectionError::UnexpectedFrame {
                stream_id: 5,
                frame_type: FrameType::Cancel
            }
        );
    }

    #[test]
    fn complete_on_open_frame_ends_immediately() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let rec = Recorder::new();
        let initial = RequestChannelFrame::new(1, FrameFlags::COMPLETE, 0, Payload::from("only"));
        conn.register_channel(initial, rec.clone()).expect("register");
        assert!(!conn.contains_stream(1));
        rec.with(|rec| {
            assert_eq!(rec.items.len(), 1);
            assert_eq!(rec.completions, 1);
        });
    }

    #[test]
    fn complete_deregisters_stream() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let rec = open(&mut conn, 1, 1);
        conn.on_next(1, Payload::from("a"));
        conn.on_complete(1);
        assert!(!conn.contains_stream(1));

        let frames = conn.take_pending_frames();
        assert_eq!(
            frames,
            vec![
                Frame::from(ResponseFrame::next(1, Payload::from("a"))),
                Frame::from(ResponseFrame::complete(1)),
            ]
        );
        rec.with(|rec| assert_eq!(rec.completions, 1));

        // Everything after the end is swallowed.
        conn.on_complete(1);
        conn.on_error(1, StreamError::application("late"));
        conn.on_next(1, Payload::from("late"));
        assert!(!conn.has_pending_frames());
        rec.with(|rec| assert_eq!(rec.terminal_count(), 1));
    }

    #[test]
    fn error_deregisters_stream() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let rec = open(&mut conn, 7, 0);
        conn.on_error(7, StreamError::application("boom"));
        assert_eq!(conn.poll_frame(), Some(ErrorFrame::application(7, "boom").into()));
        assert_eq!(conn.poll_frame(), None);
        assert!(!conn.contains_stream(7));
        rec.with(|rec| assert_eq!(rec.errors.len(), 1));
    }

    #[test]
    fn inbound_frames_route_by_stream() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let one = open(&mut conn, 1, 0);
        let three = open(&mut conn, 3, 0);

        conn.on_frame(CancelFrame::new(3).into()).expect("route");
        assert!(conn.contains_stream(1));
        assert!(!conn.contains_stream(3));
        assert!(!conn.has_pending_frames());
        one.with(|rec| assert_eq!(rec.terminal_count(), 0));
        three.with(|rec| assert_eq!(rec.completions, 1));
    }

    #[test]
    fn unknown_stream_frames_are_dropped() {
        let mut conn = ConnectionAutomaton::<Recorder>::new(ConnectionConfig::default());
        assert!(conn.on_frame(CancelFrame::new(42).into()).is_ok());
        assert_eq!(
            conn.on_frame(CancelFrame::new(0).into()),
            Err(ConnectionError::ReservedStreamId)
        );
        assert_eq!(conn.stream_count(), 0);
    }

    #[test]
    fn disconnect_ends_all_streams_once() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let recs: Vec<Recorder> = [1, 3, 5].iter().map(|id| open(&mut conn, *id, 0)).collect();
        conn.disconnect(StreamCompletionSignal::ConnectionError);
        assert_eq!(conn.stream_count(), 0);
        assert!(conn.is_closed());
        assert!(!conn.has_pending_frames());
        for rec in &recs {
            rec.with(|rec| {
                assert_eq!(
                    rec.errors,
                    vec![StreamError::Terminated(StreamCompletionSignal::ConnectionError)]
                );
                assert_eq!(rec.completions, 0);
            });
        }

        let frame = RequestChannelFrame::new(9, FrameFlags::empty(), 0, Payload::empty());
        assert_eq!(
            conn.register_channel(frame, Recorder::new()),
            Err(ConnectionError::Closed)
        );
    }

    #[test]
    fn graceful_disconnect_becomes_connection_end() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let rec = open(&mut conn, 1, 0);
        conn.disconnect(StreamCompletionSignal::Graceful);
        rec.with(|rec| {
            assert_eq!(
                rec.errors,
                vec![StreamError::Terminated(StreamCompletionSignal::ConnectionEnd)]
            );
        });
    }

    #[test]
    fn demand_from_subscriber_callbacks() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let rec = Recorder::requesting_per_item(2, 1);
        let initial = RequestChannelFrame::new(1, FrameFlags::empty(), 0, Payload::from("hi"));
        conn.register_channel(initial, rec.clone()).expect("register");
        assert_eq!(
            conn.take_pending_frames(),
            vec![
                Frame::from(RequestNFrame::new(1, 2)),
                Frame::from(RequestNFrame::new(1, 1)),
            ]
        );

        let item = RequestChannelFrame::new(1, FrameFlags::empty(), 0, Payload::from("x"));
        conn.on_frame(item.into()).expect("route");
        assert_eq!(
            conn.take_pending_frames(),
            vec![Frame::from(RequestNFrame::new(1, 1))]
        );
        rec.with(|rec| assert_eq!(rec.items.len(), 2));
    }

    #[test]
    fn recorded_cancel_applies_on_poll() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let rec = open(&mut conn, 1, 0);
        let other = open(&mut conn, 3, 0);
        conn.responder(1)
            .expect("open")
            .flow_control()
            .subscription()
            .cancel();
        assert!(conn.contains_stream(1));

        conn.poll_subscriptions();
        assert!(!conn.contains_stream(1));
        assert!(conn.contains_stream(3));
        assert_eq!(
            conn.take_pending_frames(),
            vec![Frame::from(ResponseFrame::complete(1))]
        );
        rec.with(|rec| assert_eq!(rec.completions, 1));
        other.with(|rec| assert_eq!(rec.terminal_count(), 0));
    }

    #[test]
    fn complete_waits_for_credit() {
        let mut conn = ConnectionAutomaton::new(ConnectionConfig::default());
        let rec = open(&mut conn, 1, 0);
        conn.on_next(1, Payload::from("a"));
        conn.on_next(1, Payload::from("b"));
        conn.on_complete(1);
        assert!(conn.contains_stream(1));
        assert!(!conn.has_pending_frames());
        rec.with(|rec| assert_eq!(rec.terminal_count(), 0));

        conn.on_frame(RequestNFrame::new(1, 2).into()).expect("route");
        assert_eq!(
            conn.take_pending_frames(),
            vec![
                Frame::from(ResponseFrame::next(1, Payload::from("a"))),
                Frame::from(ResponseFrame::next(1, Payload::from("b"))),
                Frame::from(ResponseFrame::complete(1)),
            ]
        );
        assert!(!conn.contains_stream(1));
        rec.with(|rec| assert_eq!(rec.completions, 1));
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionAutomaton::<Recorder>::new(ConnectionConfig::default());
        let b = ConnectionAutomaton::<Recorder>::new(ConnectionConfig::default());
        assert_ne!(a.connection_id(), b.connection_id());
    }
}
