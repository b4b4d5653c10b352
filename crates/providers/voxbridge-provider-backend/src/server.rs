//! WebSocket server hosting one [`VoicePipeline`] per connection
//!
//! Every binary WebSocket message carries exactly one encoded frame. Text
//! messages are not part of the protocol and are dropped.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use voxbridge_core::{AudioEncoding, BridgeError, Result, VoiceFrame};

use crate::pipeline::{PipelineConfig, VoicePipeline};
use crate::types::Engines;

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Pipeline settings applied to each connection
    pub pipeline: PipelineConfig,
    /// Close connections that stay silent this long
    pub session_timeout: Duration,
    /// How outbound audio is written
    pub encoding: AudioEncoding,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            pipeline: PipelineConfig::default(),
            session_timeout: Duration::from_secs(180),
            encoding: AudioEncoding::IntArray,
        }
    }
}

/// Shared server state
pub struct ServerState {
    engines: Engines,
    config: ServerConfig,
    active: AtomicUsize,
    served: AtomicU64,
}

impl ServerState {
    /// Create state for a server
    pub fn new(engines: Engines, config: ServerConfig) -> Self {
        Self {
            engines,
            config,
            active: AtomicUsize::new(0),
            served: AtomicU64::new(0),
        }
    }

    /// Connections currently open
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Connections accepted since startup
    pub fn total_sessions(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }
}

/// Routes: `GET /ws` (upgrade) and `GET /health`
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `host:port` and serve until the process exits
pub async fn serve(config: ServerConfig, engines: Engines) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Backend server ready on ws://{}/ws", addr);
    serve_on(listener, Arc::new(ServerState::new(engines, config))).await
}

/// Serve on an already bound listener
pub async fn serve_on(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "engines": state.engines.names(),
        "sessions": {
            "active": state.active_sessions(),
            "total": state.total_sessions(),
        },
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ============================================================================
// WebSocket Handler
// ============================================================================

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut pipeline = VoicePipeline::new(state.engines.clone(), state.config.pipeline.clone());
    let session = pipeline.id();

    state.active.fetch_add(1, Ordering::SeqCst);
    state.served.fetch_add(1, Ordering::SeqCst);
    info!(session = %session, "New WebSocket session started");

    loop {
        let msg = match tokio::time::timeout(state.config.session_timeout, receiver.next()).await {
            Err(_) => {
                info!(session = %session, timeout = ?state.config.session_timeout, "Session timeout");
                close(&mut sender, close_code::AWAY, "Session timeout").await;
                break;
            }
            Ok(None) => break,
            Ok(Some(msg)) => msg,
        };

        match msg {
            Ok(Message::Binary(data)) => {
                let frame = match VoiceFrame::decode(&data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(session = %session, error = %e, bytes = data.len(), "Dropping undecodable message");
                        continue;
                    }
                };
                debug!(session = %session, kind = %frame.kind(), "Frame received");

                match pipeline.handle(frame).await {
                    Ok(replies) => {
                        if let Err(e) = send_frames(&mut sender, &replies, state.config.encoding).await {
                            error!(session = %session, error = %e, "Failed to send reply");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(session = %session, error = %e, "Frame rejected");
                    }
                }

                if pipeline.is_finished() {
                    close(&mut sender, close_code::NORMAL, "Session ended").await;
                    break;
                }
            }
            Ok(Message::Text(text)) => {
                warn!(session = %session, len = text.len(), "Rejected text message; frames must be sent as binary");
            }
            Ok(Message::Close(_)) => {
                info!(session = %session, "WebSocket closed");
                break;
            }
            Err(e) => {
                error!(session = %session, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    state.active.fetch_sub(1, Ordering::SeqCst);
    info!(session = %session, utterances = pipeline.utterances(), "WebSocket session finished");
}

async fn send_frames(
    sender: &mut SplitSink<WebSocket, Message>,
    frames: &[VoiceFrame],
    encoding: AudioEncoding,
) -> Result<()> {
    for frame in frames {
        let bytes = frame.encode(encoding)?;
        sender
            .send(Message::Binary(bytes.to_vec()))
            .await
            .map_err(|e| BridgeError::network(format!("send failed: {}", e)))?;
    }
    Ok(())
}

async fn close(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}
