//! Core types for the backend engines

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use voxbridge_core::{AudioChunk, Result};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model
    System,
    /// The human in the voice channel
    User,
    /// The bot
    Assistant,
}

/// One message of conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it
    pub role: Role,
    /// What was said
    pub content: String,
}

impl ChatMessage {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Speech engine trait - implemented by each STT backend
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Engine name
    fn name(&self) -> &str;

    /// Transcribe 16-bit mono PCM to text
    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<String>;

    /// Check if engine is ready (model loaded, service available)
    async fn is_ready(&self) -> bool {
        true
    }
}

/// Language model trait - produces the assistant's next reply
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Engine name
    fn name(&self) -> &str;

    /// Reply to a conversation; the last message is the newest user turn
    async fn respond(&self, history: &[ChatMessage]) -> Result<String>;
}

/// Voice engine trait - implemented by each TTS backend
#[async_trait]
pub trait VoiceEngine: Send + Sync {
    /// Engine name
    fn name(&self) -> &str;

    /// Synthesize text to 16-bit PCM
    async fn synthesize(&self, text: &str) -> Result<AudioChunk>;

    /// Sample rate of synthesized audio
    fn output_sample_rate(&self) -> u32;
}

/// Text-to-phoneme step used by TTS engines
#[async_trait]
pub trait PhonemeBackend: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Split text into phonemes
    async fn phonemize(&self, text: &str) -> Result<Vec<String>>;
}

/// The three engines a pipeline runs, shared across connections
#[derive(Clone)]
pub struct Engines {
    /// Speech-to-text
    pub stt: Arc<dyn SpeechEngine>,
    /// Language model
    pub llm: Arc<dyn LanguageModel>,
    /// Text-to-speech
    pub tts: Arc<dyn VoiceEngine>,
}

impl Engines {
    /// Bundle engines
    pub fn new(
        stt: Arc<dyn SpeechEngine>,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn VoiceEngine>,
    ) -> Self {
        Self { stt, llm, tts }
    }

    /// Engine names for health reporting
    pub fn names(&self) -> serde_json::Value {
        serde_json::json!({
            "stt": self.stt.name(),
            "llm": self.llm.name(),
            "tts": self.tts.name(),
        })
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("stt", &self.stt.name())
            .field("llm", &self.llm.name())
            .field("tts", &self.tts.name())
            .finish()
    }
}

/// Engine failure types
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Engine not ready
    #[error("Engine not ready: {0}")]
    NotReady(String),

    /// Transcription failed
    #[error("Transcription failed: {0}")]
    Transcription(String),

    /// Generation failed
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Synthesis failed
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// Unsupported input
    #[error("Unsupported input: {0}")]
    Unsupported(String),
}

impl From<EngineError> for voxbridge_core::BridgeError {
    fn from(err: EngineError) -> Self {
        voxbridge_core::BridgeError::engine(err.to_string())
    }
}
