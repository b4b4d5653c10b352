//! Backend voice server
//!
//! Serves the framed WebSocket protocol on `/ws` with placeholder engines:
//! energy VAD, a fixed transcript, an echoing language model and silent TTS.
//!
//! Usage:
//! ```bash
//! backend-server --port 8765 --silence-ms 800 --transcript "turn on the lights"
//! ```

use clap::Parser;
use std::time::Duration;
use tracing::info;
use voxbridge_core::{init_logging, load_env, AudioEncoding};
use voxbridge_provider_backend::{
    placeholder_engines, serve, PipelineConfig, ServerConfig, VadConfig,
};

#[derive(Parser, Debug)]
#[command(name = "backend-server")]
#[command(about = "Voice backend serving STT -> LLM -> TTS over framed WebSocket messages")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8765", env = "BACKEND_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "BACKEND_HOST")]
    host: String,

    /// System prompt opening every conversation
    #[arg(long, env = "BACKEND_SYSTEM_PROMPT")]
    system_prompt: Option<String>,

    /// VAD silence threshold in ms
    #[arg(long, default_value = "800")]
    silence_ms: u64,

    /// VAD energy threshold (RMS)
    #[arg(long, default_value = "400")]
    energy_threshold: f64,

    /// Minimum audio length in ms before transcribing
    #[arg(long, default_value = "400")]
    min_audio_ms: u64,

    /// Longest utterance in ms before it is transcribed mid-speech
    #[arg(long, default_value = "30000")]
    max_utterance_ms: u64,

    /// Close connections idle for this many seconds
    #[arg(long, default_value = "180", env = "BACKEND_SESSION_TIMEOUT")]
    session_timeout_secs: u64,

    /// Transcript returned by the placeholder speech engine
    #[arg(long, default_value = "Test transcription from local speech engine")]
    transcript: String,

    /// Sample rate of synthesized audio
    #[arg(long, default_value = "16000")]
    output_sample_rate: u32,

    /// Write outbound audio as base64 instead of an integer array
    #[arg(long)]
    base64_audio: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env()?;
    init_logging("info");

    let args = Args::parse();

    let mut pipeline = PipelineConfig {
        vad: VadConfig {
            energy_threshold: args.energy_threshold,
            silence_ms: args.silence_ms,
            min_audio_ms: args.min_audio_ms,
            max_utterance_ms: args.max_utterance_ms,
        },
        ..Default::default()
    };
    if let Some(prompt) = args.system_prompt {
        pipeline.system_prompt = prompt;
    }

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        pipeline,
        session_timeout: Duration::from_secs(args.session_timeout_secs),
        encoding: if args.base64_audio {
            AudioEncoding::Base64
        } else {
            AudioEncoding::IntArray
        },
    };

    let engines = placeholder_engines(args.transcript, args.output_sample_rate);
    info!(engines = ?engines, "Backend engines ready");
    info!(
        "  VAD: silence={}ms, min_audio={}ms, threshold={}",
        args.silence_ms, args.min_audio_ms, args.energy_threshold
    );

    serve(config, engines).await?;
    Ok(())
}
