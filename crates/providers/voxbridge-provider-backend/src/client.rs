//! Reconnecting WebSocket client for the backend
//!
//! One persistent connection per voice session. Outbound frames go through
//! [`BackendClient::send`]; inbound frames are decoded by a reader task and
//! delivered on an `mpsc` channel. If the socket drops without a normal close
//! the reader reconnects with exponential backoff and replays the last `start`
//! frame so the backend pipeline is primed again.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use voxbridge_core::{
    retry_with_backoff, AudioEncoding, BridgeError, ConnectionConfig, FrameSink, Result,
    RetryConfig, VoiceFrame,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Capacity of the inbound frame channel
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Check a backend's HTTP health endpoint; true on any 2xx
pub async fn health_check(url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build HTTP client");
            return false;
        }
    };
    match client.get(url).send().await {
        Ok(response) => {
            let healthy = response.status().is_success();
            debug!(url = %url, status = %response.status(), "Backend health check");
            healthy
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Backend health check failed");
            false
        }
    }
}

struct Inner {
    url: String,
    config: ConnectionConfig,
    encoding: AudioEncoding,
    sink: Mutex<Option<WsSink>>,
    start_frame: parking_lot::Mutex<Option<VoiceFrame>>,
    connected: AtomicBool,
    closed: AtomicBool,
}

/// How a connection's read side finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    /// Normal close, or we closed it ourselves
    Clean,
    /// Error, unexpected EOF or a non-normal close code
    Dropped,
    /// Nobody is listening for frames any more
    ReceiverGone,
}

/// Persistent connection to the backend
#[derive(Clone)]
pub struct BackendClient {
    inner: Arc<Inner>,
}

impl BackendClient {
    /// Connect to `url`, trying up to `config.initial_attempts` times
    ///
    /// Returns the client and the channel inbound frames arrive on. The
    /// channel closes when the connection is closed for good.
    pub async fn connect(
        url: &str,
        config: ConnectionConfig,
    ) -> Result<(Self, mpsc::Receiver<VoiceFrame>)> {
        Self::connect_with_encoding(url, config, AudioEncoding::IntArray).await
    }

    /// Like [`BackendClient::connect`] with an explicit outbound audio encoding
    pub async fn connect_with_encoding(
        url: &str,
        config: ConnectionConfig,
        encoding: AudioEncoding,
    ) -> Result<(Self, mpsc::Receiver<VoiceFrame>)> {
        let attempts = config.initial_attempts.max(1);
        let pacing = RetryConfig {
            max_retries: attempts - 1,
            initial_delay: config.attempt_pause,
            max_delay: config.attempt_pause,
            multiplier: 1.0,
        };
        let mut attempt = 0;
        let ws = retry_with_backoff(&pacing, || {
            attempt += 1;
            info!(url = %url, attempt = attempt, max = attempts, "Connecting to backend...");
            open(url, config.connect_timeout())
        })
        .await
        .map_err(|e| {
            BridgeError::network(format!(
                "Failed to connect to {} after {} attempts: {}",
                url, attempts, e
            ))
        })?;

        let (sink, source) = ws.split();
        let inner = Arc::new(Inner {
            url: url.to_string(),
            config,
            encoding,
            sink: Mutex::new(Some(sink)),
            start_frame: parking_lot::Mutex::new(None),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        tokio::spawn(run_reader(inner.clone(), source, tx));

        info!(url = %url, "Backend connected");
        Ok((Self { inner }, rx))
    }

    /// URL this client connects to
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Whether the socket is currently up
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Encode and send one frame as a single binary message
    pub async fn send(&self, frame: &VoiceFrame) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::not_connected("client was closed"));
        }
        if !self.is_connected() {
            return Err(BridgeError::not_connected(format!(
                "backend {} is disconnected",
                self.inner.url
            )));
        }

        let bytes = frame.encode(self.inner.encoding)?;
        if matches!(frame, VoiceFrame::Start(_)) {
            *self.inner.start_frame.lock() = Some(frame.clone());
        }

        let mut guard = self.inner.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| BridgeError::not_connected("no backend socket"))?;
        if let Err(e) = sink.send(Message::Binary(bytes.to_vec())).await {
            self.inner.connected.store(false, Ordering::SeqCst);
            return Err(BridgeError::network(format!("Send failed: {}", e)));
        }
        Ok(())
    }

    /// Close the connection with code 1000; the reader will not reconnect
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);

        let mut guard = self.inner.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "Client disconnecting".into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                debug!(error = %e, "Close frame not delivered");
            }
            let _ = sink.close().await;
            info!(url = %self.inner.url, "Backend connection closed");
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSink for BackendClient {
    async fn send_frame(&self, frame: &VoiceFrame) -> Result<()> {
        self.send(frame).await
    }

    async fn close(&self) -> Result<()> {
        BackendClient::close(self).await
    }

    fn is_open(&self) -> bool {
        self.is_connected()
    }
}

async fn open(url: &str, timeout: Duration) -> Result<WsStream> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(BridgeError::network(format!("Failed to connect: {}", e))),
        Err(_) => Err(BridgeError::timeout(format!(
            "connection to {} timed out after {:?}",
            url, timeout
        ))),
    }
}

/// Reader task - decodes inbound frames and reconnects after drops
async fn run_reader(inner: Arc<Inner>, mut source: WsSource, tx: mpsc::Sender<VoiceFrame>) {
    loop {
        let end = read_frames(&mut source, &tx).await;
        inner.connected.store(false, Ordering::SeqCst);

        if end != ReadEnd::Dropped || inner.closed.load(Ordering::SeqCst) {
            debug!(url = %inner.url, end = ?end, "Backend reader finished");
            break;
        }

        warn!(url = %inner.url, "Backend connection lost, reconnecting");
        match reconnect(&inner).await {
            Some(next) => source = next,
            None => break,
        }
    }
}

async fn read_frames(source: &mut WsSource, tx: &mpsc::Sender<VoiceFrame>) -> ReadEnd {
    while let Some(msg) = source.next().await {
        match msg {
            Ok(Message::Binary(data)) => match VoiceFrame::decode(&data) {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        return ReadEnd::ReceiverGone;
                    }
                }
                Err(e) => {
                    warn!(error = %e, bytes = data.len(), "Dropping undecodable frame");
                }
            },
            Ok(Message::Text(text)) => {
                debug!(len = text.len(), "Ignoring text message from backend");
            }
            Ok(Message::Close(frame)) => {
                let normal = frame
                    .as_ref()
                    .map(|f| f.code == CloseCode::Normal)
                    .unwrap_or(true);
                info!(close = ?frame, "Backend closed the connection");
                return if normal { ReadEnd::Clean } else { ReadEnd::Dropped };
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "WebSocket error");
                return ReadEnd::Dropped;
            }
        }
    }
    ReadEnd::Dropped
}

async fn reconnect(inner: &Arc<Inner>) -> Option<WsSource> {
    let policy = &inner.config.reconnect;
    let mut attempt = 0;
    let result = retry_with_backoff(policy, || {
        attempt += 1;
        reopen(inner, attempt)
    })
    .await;
    match result {
        Ok(source) => source,
        Err(e) => {
            error!(url = %inner.url, attempts = attempt, error = %e, "Giving up on backend");
            None
        }
    }
}

/// One reconnect attempt; `Ok(None)` once the client has been closed
async fn reopen(inner: &Inner, attempt: usize) -> Result<Option<WsSource>> {
    if inner.closed.load(Ordering::SeqCst) {
        return Ok(None);
    }
    debug!(url = %inner.url, attempt = attempt, "Reconnecting to backend");
    let ws = open(&inner.url, inner.config.connect_timeout()).await?;
    let (mut sink, source) = ws.split();

    let start = inner.start_frame.lock().clone();
    if let Some(start) = start {
        match start.encode(inner.encoding) {
            Ok(bytes) => sink
                .send(Message::Binary(bytes.to_vec()))
                .await
                .map_err(|e| BridgeError::network(format!("Failed to replay start frame: {}", e)))?,
            Err(e) => warn!(error = %e, "Failed to encode start frame"),
        }
    }

    let mut guard = inner.sink.lock().await;
    if inner.closed.load(Ordering::SeqCst) {
        return Ok(None);
    }
    *guard = Some(sink);
    inner.connected.store(true, Ordering::SeqCst);
    info!(url = %inner.url, attempt = attempt, "Backend reconnected");
    Ok(Some(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure_reports_attempts() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ConnectionConfig {
            connect_timeout_secs: 1,
            initial_attempts: 2,
            attempt_pause: Duration::from_millis(10),
            ..Default::default()
        };
        let err = BackendClient::connect(&format!("ws://127.0.0.1:{}/ws", port), config)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("after 2 attempts"));
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        assert!(!health_check("http://127.0.0.1:1/health").await);
    }
}
