//! Voxbridge backend provider
//!
//! The AI side of the bridge: speech-to-text, a language model and
//! text-to-speech behind async traits, wired into a per-connection
//! [`VoicePipeline`] and served over WebSocket using the framed message
//! format from `voxbridge-core`.
//!
//! - [`server`] hosts pipelines (`backend-server` binary, `server` feature)
//! - [`client`] is the reconnecting client the Discord bridge uses
//! - [`engines`] holds placeholder engines; real models implement [`types`]
//!
//! # Example
//!
//! ```no_run
//! use voxbridge_core::{ConnectionConfig, StartParams, VoiceFrame};
//! use voxbridge_provider_backend::BackendClient;
//!
//! # async fn run() -> voxbridge_core::Result<()> {
//! let (client, mut frames) =
//!     BackendClient::connect("ws://127.0.0.1:8765/ws", ConnectionConfig::default()).await?;
//! client.send(&VoiceFrame::Start(StartParams::default())).await?;
//! client.send(&VoiceFrame::text("hello")).await?;
//! while let Some(frame) = frames.recv().await {
//!     println!("{:?}", frame.kind());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod engines;
pub mod pipeline;
#[cfg(feature = "server")]
pub mod server;
pub mod types;
pub mod vad;

pub use client::{health_check, BackendClient};
pub use engines::{
    placeholder_engines, EchoLanguageModel, FixedTranscriber, SilenceVoiceEngine, WordPhonemes,
};
pub use pipeline::{PipelineConfig, VoicePipeline, DEFAULT_SYSTEM_PROMPT};
#[cfg(feature = "server")]
pub use server::{router, serve, serve_on, ServerConfig, ServerState};
pub use types::{
    ChatMessage, EngineError, Engines, LanguageModel, PhonemeBackend, Role, SpeechEngine,
    VoiceEngine,
};
pub use vad::{EnergyVad, VadConfig, VadEvent};
