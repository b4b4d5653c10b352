//! Engine implementations (STT, LLM, TTS)
//!
//! Only placeholder engines ship here. Real models plug in by implementing the
//! traits in [`crate::types`].

pub mod language;
pub mod speech;
pub mod voice;

pub use language::EchoLanguageModel;
pub use speech::FixedTranscriber;
pub use voice::{SilenceVoiceEngine, WordPhonemes};

use std::sync::Arc;

use crate::types::Engines;

/// Placeholder engine set: fixed transcript, echoing LLM, silent TTS
pub fn placeholder_engines(transcript: impl Into<String>, output_sample_rate: u32) -> Engines {
    Engines::new(
        Arc::new(FixedTranscriber::new(transcript)),
        Arc::new(EchoLanguageModel::default()),
        Arc::new(SilenceVoiceEngine::new(WordPhonemes, output_sample_rate)),
    )
}
