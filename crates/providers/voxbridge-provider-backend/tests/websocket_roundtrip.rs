//! End-to-end tests: real server, real client, framed messages over TCP

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use voxbridge_core::audio::samples_for_ms;
use voxbridge_core::{
    AudioChunk, AudioEncoding, ConnectionConfig, RetryConfig, StartParams, VoiceFrame,
};
use voxbridge_provider_backend::{
    placeholder_engines, serve_on, BackendClient, ServerConfig, ServerState,
};

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::new(
        placeholder_engines("turn on the lights", 16000),
        ServerConfig::default(),
    ));
    tokio::spawn(serve_on(listener, state));
    format!("127.0.0.1:{}", addr.port())
}

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout_secs: 5,
        initial_attempts: 3,
        attempt_pause: Duration::from_millis(50),
        reconnect: RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        },
    }
}

async fn next_frame(frames: &mut tokio::sync::mpsc::Receiver<VoiceFrame>) -> Option<VoiceFrame> {
    tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("timed out waiting for frame")
}

#[tokio::test]
async fn text_turn_gets_text_and_audio_reply() {
    let addr = spawn_server().await;
    let (client, mut frames) = BackendClient::connect(&format!("ws://{}/ws", addr), fast_config())
        .await
        .unwrap();

    client.send(&VoiceFrame::Start(StartParams::new(16000, 1))).await.unwrap();
    client.send(&VoiceFrame::text("hello")).await.unwrap();

    assert_eq!(
        next_frame(&mut frames).await,
        Some(VoiceFrame::text("Response to: hello"))
    );
    match next_frame(&mut frames).await {
        Some(VoiceFrame::AudioOutput(chunk)) => {
            assert_eq!(chunk.sample_rate, 16000);
            assert!(chunk.duration_ms() <= 100);
        }
        other => panic!("expected audio, got {:?}", other),
    }

    client.close().await.unwrap();
    assert!(!client.is_connected());
    assert!(client.send(&VoiceFrame::End).await.is_err());
}

#[tokio::test]
async fn spoken_utterance_is_transcribed_and_answered() {
    let addr = spawn_server().await;
    let (client, mut frames) = BackendClient::connect(&format!("ws://{}/ws", addr), fast_config())
        .await
        .unwrap();

    client.send(&VoiceFrame::Start(StartParams::default())).await.unwrap();
    let loud = AudioChunk::from_samples(&vec![4000i16; samples_for_ms(16000, 100)], 16000, 1);
    let quiet = AudioChunk::from_samples(&vec![0i16; samples_for_ms(16000, 100)], 16000, 1);
    for _ in 0..5 {
        client.send(&VoiceFrame::AudioInput(loud.clone())).await.unwrap();
    }
    for _ in 0..8 {
        client.send(&VoiceFrame::AudioInput(quiet.clone())).await.unwrap();
    }

    assert_eq!(
        next_frame(&mut frames).await,
        Some(VoiceFrame::text("Response to: turn on the lights"))
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn end_frame_closes_the_session() {
    let addr = spawn_server().await;
    let (client, mut frames) = BackendClient::connect(&format!("ws://{}/ws", addr), fast_config())
        .await
        .unwrap();

    client.send(&VoiceFrame::Start(StartParams::default())).await.unwrap();
    client.send(&VoiceFrame::End).await.unwrap();

    // Normal close: no reconnect, channel ends
    assert_eq!(next_frame(&mut frames).await, None);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn text_messages_and_garbage_are_ignored() {
    let addr = spawn_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();

    ws.send(Message::Text("{\"type\": \"start\"}".to_string())).await.unwrap();
    ws.send(Message::Binary(vec![0, 0, 0, 9, 1])).await.unwrap();

    let start = VoiceFrame::Start(StartParams::default()).encode(AudioEncoding::IntArray).unwrap();
    let text = VoiceFrame::text("still here?").encode(AudioEncoding::IntArray).unwrap();
    ws.send(Message::Binary(start.to_vec())).await.unwrap();
    ws.send(Message::Binary(text.to_vec())).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match reply {
        Message::Binary(data) => {
            assert_eq!(
                VoiceFrame::decode(&data).unwrap(),
                VoiceFrame::text("Response to: still here?")
            );
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[tokio::test]
async fn health_endpoint_reports_engines() {
    let addr = spawn_server().await;
    assert!(voxbridge_provider_backend::health_check(&format!("http://{}/health", addr)).await);

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["engines"]["llm"], "echo");
}

#[tokio::test]
async fn client_reconnects_and_replays_start() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        // First connection: read the start frame, then drop without a close handshake
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let first = ws.next().await.unwrap().unwrap();
        drop(ws);

        // Second connection: the start frame must arrive again unprompted
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let replayed = ws.next().await.unwrap().unwrap();
        let ack = VoiceFrame::text("welcome back").encode(AudioEncoding::IntArray).unwrap();
        ws.send(Message::Binary(ack.to_vec())).await.unwrap();
        (first, replayed, ws)
    });

    let (client, mut frames) =
        BackendClient::connect(&format!("ws://127.0.0.1:{}/ws", port), fast_config())
            .await
            .unwrap();
    client.send(&VoiceFrame::Start(StartParams::new(16000, 1))).await.unwrap();

    assert_eq!(next_frame(&mut frames).await, Some(VoiceFrame::text("welcome back")));
    assert!(client.is_connected());

    let (first, replayed, _ws) = server.await.unwrap();
    assert_eq!(first, replayed);
    match replayed {
        Message::Binary(data) => {
            assert_eq!(
                VoiceFrame::decode(&data).unwrap(),
                VoiceFrame::Start(StartParams::new(16000, 1))
            );
        }
        other => panic!("unexpected message {:?}", other),
    }
}
