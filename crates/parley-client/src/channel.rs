//! Queued, reconnect-tolerant duplex channel over `tokio-tungstenite`.
//!
//! One generic implementation backs both the primary conversation socket and
//! the secondary command channel. A spawned actor owns the connection:
//! frames sent while the socket is open go out immediately; frames sent
//! while it is down join a FIFO queue that drains at **one frame per flush
//! tick** once the connection is back — a deliberate backpressure and
//! ordering control, not an oversight. There is no bulk replay.
//!
//! The actor reconnects with a fixed delay after any drop and is torn down
//! through a [`CancellationToken`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::constants::{SOCKET_FLUSH_INTERVAL, SOCKET_RECONNECT_DELAY};
use parley_core::{ChatConfig, ConversationId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handler invoked with every inbound text frame.
pub type FrameHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Timing knobs for the channel actor. Production uses the fixed package
/// constants; tests inject short durations.
#[derive(Clone, Debug)]
pub struct ChannelTuning {
    /// Interval between queue flush ticks.
    pub flush_interval: Duration,
    /// Delay before reattempting a dropped connection.
    pub reconnect_delay: Duration,
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            flush_interval: SOCKET_FLUSH_INTERVAL,
            reconnect_delay: SOCKET_RECONNECT_DELAY,
        }
    }
}

/// A queued duplex channel to one WebSocket URL.
///
/// Dropping the handle (or calling [`QueuedChannel::close`]) cancels the
/// actor, which detaches the inbound handler and closes the socket.
pub struct QueuedChannel {
    frame_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    _actor: JoinHandle<()>,
}

impl QueuedChannel {
    /// Connect with default tuning. Must be called within a Tokio runtime.
    #[must_use]
    pub fn connect(url: String, on_frame: FrameHandler) -> Self {
        Self::connect_with(url, on_frame, ChannelTuning::default())
    }

    /// Connect with explicit tuning. Must be called within a Tokio runtime.
    #[must_use]
    pub fn connect_with(url: String, on_frame: FrameHandler, tuning: ChannelTuning) -> Self {
        let cancel = CancellationToken::new();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let actor = tokio::spawn(channel_loop(url, frame_rx, on_frame, tuning, cancel.clone()));
        Self {
            frame_tx,
            cancel,
            _actor: actor,
        }
    }

    /// Send a text frame: immediately when the socket is open, otherwise
    /// queued until the connection returns.
    pub fn send(&self, frame: impl Into<String>) {
        if self.frame_tx.send(frame.into()).is_err() {
            warn!("channel actor is gone; frame dropped");
        }
    }

    /// Tear the channel down.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for QueuedChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Wait {
    Retry,
    Shutdown,
}

async fn channel_loop(
    url: String,
    mut frame_rx: mpsc::UnboundedReceiver<String>,
    on_frame: FrameHandler,
    tuning: ChannelTuning,
    cancel: CancellationToken,
) {
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut flush = time::interval(tuning.flush_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

    'reconnect: loop {
        // Connecting: frames arriving now are queued, not sent.
        let connect = connect_async(url.as_str());
        tokio::pin!(connect);
        let ws: WsStream = loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                frame = frame_rx.recv() => match frame {
                    Some(frame) => queue.push_back(frame),
                    None => return,
                },
                result = &mut connect => match result {
                    Ok((ws, _)) => break ws,
                    Err(e) => {
                        warn!(error = %e, url = %url, "socket connect failed");
                        match wait_before_retry(&mut frame_rx, &mut queue, &cancel, tuning.reconnect_delay).await {
                            Wait::Retry => continue 'reconnect,
                            Wait::Shutdown => return,
                        }
                    }
                },
            }
        };
        debug!(url = %url, queued = queue.len(), "socket connected");
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Connected: direct sends, one queued frame per flush tick.
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = ws_tx.close().await;
                    return;
                }
                _ = flush.tick() => {
                    if let Some(frame) = queue.pop_front() {
                        if let Err(e) = ws_tx.send(Message::Text(frame.clone().into())).await {
                            warn!(error = %e, "socket flush failed");
                            queue.push_front(frame);
                            break;
                        }
                    }
                }
                frame = frame_rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = ws_tx.send(Message::Text(frame.clone().into())).await {
                            warn!(error = %e, "socket send failed");
                            queue.push_back(frame);
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.close().await;
                        return;
                    }
                },
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => on_frame(text.as_str()),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }

        warn!(url = %url, "socket disconnected, reconnecting");
        match wait_before_retry(&mut frame_rx, &mut queue, &cancel, tuning.reconnect_delay).await {
            Wait::Retry => {}
            Wait::Shutdown => return,
        }
    }
}

/// Sit out the reconnect delay while still queueing outbound frames.
async fn wait_before_retry(
    frame_rx: &mut mpsc::UnboundedReceiver<String>,
    queue: &mut VecDeque<String>,
    cancel: &CancellationToken,
    delay: Duration,
) -> Wait {
    let retry = time::sleep(delay);
    tokio::pin!(retry);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Wait::Shutdown,
            () = &mut retry => return Wait::Retry,
            frame = frame_rx.recv() => match frame {
                Some(frame) => queue.push_back(frame),
                None => return Wait::Shutdown,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// URL derivation
// ─────────────────────────────────────────────────────────────────────────────

/// Derive the primary socket URL: base plus `languageCode`, `channelKey`
/// (suffixed with the language) and `conversationId` query parameters,
/// unless `completeApplicationUrl` is set.
#[must_use]
pub fn socket_url(
    config: &ChatConfig,
    language_code: &str,
    conversation_id: &ConversationId,
) -> String {
    if config.experimental.complete_application_url {
        return config.application_url.clone();
    }
    let Ok(mut url) = Url::parse(&config.application_url) else {
        warn!(url = %config.application_url, "application URL did not parse; using it verbatim");
        return config.application_url.clone();
    };
    let channel_key = format!("{}-{}", config.channel_key(), language_code);
    let _ = url
        .query_pairs_mut()
        .append_pair("languageCode", language_code)
        .append_pair("channelKey", &channel_key)
        .append_pair("conversationId", conversation_id.as_str());
    url.to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    // ── socket_url ───────────────────────────────────────────────────

    #[test]
    fn socket_url_appends_query_parameters() {
        let config = ChatConfig::new("wss://host/c/key-1");
        let id = ConversationId::from("conv-1");
        let url = socket_url(&config, "en-US", &id);
        assert!(url.contains("languageCode=en-US"), "{url}");
        assert!(url.contains("channelKey=key-1-en-US"), "{url}");
        assert!(url.contains("conversationId=conv-1"), "{url}");
    }

    #[test]
    fn socket_url_verbatim_when_complete() {
        let mut config = ChatConfig::new("wss://host/c/key?custom=1");
        config.experimental.complete_application_url = true;
        let url = socket_url(&config, "en-US", &ConversationId::from("conv-1"));
        assert_eq!(url, "wss://host/c/key?custom=1");
    }

    // ── actor behavior ───────────────────────────────────────────────

    /// A ws server that forwards every received text frame to the test.
    async fn spawn_ws_sink(listener: TcpListener) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                drop(tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (_write, mut read) = ws.split();
                    while let Some(Ok(msg)) = read.next().await {
                        if let Message::Text(text) = msg {
                            let _ = tx.send(text.to_string());
                        }
                    }
                }));
            }
        }));
        rx
    }

    fn fast_tuning() -> ChannelTuning {
        ChannelTuning {
            flush_interval: Duration::from_millis(20),
            reconnect_delay: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn frames_sent_while_open_arrive_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let mut rx = spawn_ws_sink(listener).await;

        let channel = QueuedChannel::connect_with(url, Arc::new(|_| {}), fast_tuning());
        // Give the actor time to establish the connection.
        time::sleep(Duration::from_millis(100)).await;

        channel.send("one");
        channel.send("two");
        channel.send("three");

        for expected in ["one", "two", "three"] {
            let frame = time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("frame should arrive")
                .expect("server alive");
            assert_eq!(frame, expected);
        }
    }

    #[tokio::test]
    async fn frames_queued_while_down_drain_after_reconnect() {
        // Reserve a port, then release it so the first connect attempts fail.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel =
            QueuedChannel::connect_with(format!("ws://{addr}"), Arc::new(|_| {}), fast_tuning());

        // Queue while there is nothing to connect to.
        channel.send("queued-1");
        channel.send("queued-2");
        time::sleep(Duration::from_millis(60)).await;

        // Bring the server up on the reserved port.
        let listener = TcpListener::bind(addr).await.unwrap();
        let mut rx = spawn_ws_sink(listener).await;

        // Queued frames drain across flush ticks, in order.
        for expected in ["queued-1", "queued-2"] {
            let frame = time::timeout(Duration::from_secs(3), rx.recv())
                .await
                .expect("queued frame should drain")
                .expect("server alive");
            assert_eq!(frame, expected);
        }
    }

    #[tokio::test]
    async fn queued_frames_drain_one_per_flush_tick() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let tuning = ChannelTuning {
            flush_interval: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(20),
        };
        let channel =
            QueuedChannel::connect_with(format!("ws://{addr}"), Arc::new(|_| {}), tuning);
        channel.send("a");
        channel.send("b");
        time::sleep(Duration::from_millis(60)).await;

        let listener = TcpListener::bind(addr).await.unwrap();
        let mut rx = spawn_ws_sink(listener).await;

        let _ = time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("first frame")
            .unwrap();
        let first_at = std::time::Instant::now();
        let _ = time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("second frame")
            .unwrap();

        // The second queued frame waits for its own tick.
        assert!(
            first_at.elapsed() >= Duration::from_millis(120),
            "second frame drained too early: {:?}",
            first_at.elapsed()
        );
    }

    #[tokio::test]
    async fn inbound_frames_reach_the_handler() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        // Server that greets each connection.
        drop(tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    let _ = ws.send(Message::Text("hello".into())).await;
                }));
            }
        }));

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
        let on_frame: FrameHandler = Arc::new(move |text| {
            let _ = seen_tx.send(text.to_owned());
        });
        let _channel = QueuedChannel::connect_with(url, on_frame, fast_tuning());

        let frame = time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .expect("inbound frame should arrive")
            .expect("handler alive");
        assert_eq!(frame, "hello");
    }

    #[tokio::test]
    async fn close_stops_the_actor() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let mut rx = spawn_ws_sink(listener).await;

        let channel = QueuedChannel::connect_with(url, Arc::new(|_| {}), fast_tuning());
        time::sleep(Duration::from_millis(100)).await;
        channel.close();
        time::sleep(Duration::from_millis(50)).await;

        channel.send("after-close");
        time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "no frame should arrive after close");
    }
}
