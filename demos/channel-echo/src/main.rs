//! Channel echo demo.
//!
//! A scripted peer opens a REQUEST_CHANNEL stream and sends five pings. The
//! host side answers each ping with a pong through a `SharedConnection`:
//!
//! - the **reader** task feeds inbound frames to the connection
//! - the **app** task receives items from the stream's subscriber and replies
//! - the **peer** grants credit for more pongs, then cancels the stream
//!
//! The peer's opening frame only grants credit for two pongs, so the rest wait
//! in the responder's queue until the peer sends REQUEST_N. The subscriber
//! keeps one ping of demand ahead through its `Subscription`.
//!
//! Run with `RUST_LOG=reactivesocket_core=trace` to watch every transition.

use reactivesocket_core::{
    CancelFrame, ConnectionConfig, Frame, FrameFlags, Payload, RequestChannelFrame, RequestNFrame,
    SharedConnection, StreamError, StreamId, Subscriber, Subscription,
};
use tokio::sync::mpsc;

const STREAM_ID: StreamId = 1;
const PINGS: usize = 5;
const INITIAL_CREDIT: u32 = 2;

/// What the subscriber hands to the application task.
#[derive(Debug)]
enum AppSignal {
    Item(Payload),
    Complete,
    Error(StreamError),
}

/// Forwards stream signals to the app task.
///
/// Subscriber methods run with the connection locked, so replies cannot be
/// sent from here. Demand goes through the subscription.
struct EchoSubscriber {
    tx: mpsc::UnboundedSender<AppSignal>,
    subscription: Option<Subscription>,
}

impl EchoSubscriber {
    fn new(tx: mpsc::UnboundedSender<AppSignal>) -> Self {
        Self {
            tx,
            subscription: None,
        }
    }

    fn forward(&self, signal: AppSignal) {
        if let Err(mpsc::error::SendError(signal)) = self.tx.send(signal) {
            tracing::debug!(?signal, "app task gone, signal dropped");
        }
    }
}

impl Subscriber for EchoSubscriber {
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(1);
        self.subscription = Some(subscription);
    }

    fn on_next(&mut self, payload: Payload) {
        self.forward(AppSignal::Item(payload));
        if let Some(subscription) = &self.subscription {
            subscription.request(1);
        }
    }

    fn on_complete(&mut self) {
        self.forward(AppSignal::Complete);
    }

    fn on_error(&mut self, error: StreamError) {
        self.forward(AppSignal::Error(error));
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reactivesocket_core=debug".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async_main());
}

async fn async_main() {
    println!("=== Channel echo ===\n");

    let conn: SharedConnection<EchoSubscriber> = SharedConnection::new(ConnectionConfig::from_env());

    let (to_host, mut host_inbox) = mpsc::unbounded_channel::<Frame>();
    let (to_peer, peer_inbox) = mpsc::unbounded_channel::<Frame>();
    let (app_tx, mut app_rx) = mpsc::unbounded_channel::<AppSignal>();

    let peer = tokio::spawn(run_peer(to_host, peer_inbox));

    // Reader: the first frame opens the channel, the rest are routed.
    let reader = {
        let conn = conn.clone();
        let to_peer = to_peer.clone();
        tokio::spawn(async move {
            let mut subscriber = Some(EchoSubscriber::new(app_tx));
            while let Some(frame) = host_inbox.recv().await {
                let result = match subscriber.take() {
                    Some(subscriber) => conn.accept(frame, subscriber),
                    None => conn.on_frame(frame),
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "peer frame rejected");
                }
                flush(&conn, &to_peer);
            }
        })
    };

    // App: answer each ping until the stream ends.
    let app = {
        let conn = conn.clone();
        tokio::spawn(async move {
            let mut answered = 0usize;
            while let Some(signal) = app_rx.recv().await {
                match signal {
                    AppSignal::Item(payload) => {
                        let ping = String::from_utf8_lossy(&payload.data).into_owned();
                        answered += 1;
                        let pong = ping.replace("ping", "pong");
                        conn.on_next(STREAM_ID, Payload::from(pong.into_bytes()));
                        flush(&conn, &to_peer);
                    }
                    AppSignal::Complete => {
                        println!("[app] stream completed after {answered} replies");
                        break;
                    }
                    AppSignal::Error(e) => {
                        println!("[app] stream failed: {e}");
                        break;
                    }
                }
            }
            answered
        })
    };

    let received = peer.await.unwrap();
    let answered = app.await.unwrap();
    reader.await.unwrap();

    println!("\npeer received {received} pongs, app answered {answered} pings");
    println!("open streams left: {}", conn.stream_count());
}

/// Hand every queued outbound frame to the peer.
fn flush(conn: &SharedConnection<EchoSubscriber>, to_peer: &mpsc::UnboundedSender<Frame>) {
    for frame in conn.take_pending_frames() {
        send(to_peer, frame);
    }
}

/// Send a frame over the in-memory link, logging if the other end is gone.
fn send(link: &mpsc::UnboundedSender<Frame>, frame: Frame) {
    if let Err(mpsc::error::SendError(frame)) = link.send(frame) {
        tracing::debug!(header = %frame.header(), "link closed, frame dropped");
    }
}

/// The remote requester: pings, grants more credit, then cancels.
async fn run_peer(
    to_host: mpsc::UnboundedSender<Frame>,
    mut inbox: mpsc::UnboundedReceiver<Frame>,
) -> usize {
    let open = RequestChannelFrame::new(
        STREAM_ID,
        FrameFlags::empty(),
        INITIAL_CREDIT,
        Payload::from("ping 0"),
    );
    println!("[peer] -> {}", open.header);
    send(&to_host, open.into());
    for i in 1..PINGS {
        let item = RequestChannelFrame::new(
            STREAM_ID,
            FrameFlags::empty(),
            0,
            Payload::from(format!("ping {i}").into_bytes()),
        );
        send(&to_host, item.into());
    }

    let mut received = 0usize;
    while let Some(frame) = inbox.recv().await {
        println!("[peer] <- {}", frame.header());
        match frame {
            Frame::Response(response) if !response.is_complete() => {
                received += 1;
                let pong = String::from_utf8_lossy(&response.payload.data);
                println!("[peer]    {pong}");
                if received == INITIAL_CREDIT as usize {
                    let grant = RequestNFrame::new(STREAM_ID, (PINGS - received) as u32);
                    println!("[peer] -> {}", grant.header);
                    send(&to_host, grant.into());
                }
                if received == PINGS {
                    println!("[peer] -> CANCEL");
                    send(&to_host, CancelFrame::new(STREAM_ID).into());
                    break;
                }
            }
            other if other.is_terminal() => break,
            _ => {}
        }
    }
    received
}
