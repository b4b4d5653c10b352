//! Placeholder speech-to-text

use async_trait::async_trait;
use tracing::debug;
use voxbridge_core::Result;

use crate::types::SpeechEngine;

/// Transcript returned when none is configured
pub const DEFAULT_TRANSCRIPT: &str = "Test transcription from local speech engine";

/// Returns the same transcript for every non-empty utterance
#[derive(Debug, Clone)]
pub struct FixedTranscriber {
    transcript: String,
}

impl FixedTranscriber {
    /// Transcriber answering with `transcript`
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
        }
    }
}

impl Default for FixedTranscriber {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSCRIPT)
    }
}

#[async_trait]
impl SpeechEngine for FixedTranscriber {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        debug!(
            samples = samples.len(),
            sample_rate = sample_rate,
            "Transcribing utterance"
        );
        Ok(self.transcript.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_transcript() {
        let stt = FixedTranscriber::new("hello there");
        assert_eq!(stt.transcribe(&[1, 2, 3], 16000).await.unwrap(), "hello there");
        assert_eq!(stt.transcribe(&[], 16000).await.unwrap(), "");
        assert!(stt.is_ready().await);
    }
}
