//! Placeholder text-to-speech
//!
//! [`SilenceVoiceEngine`] asks its [`PhonemeBackend`] how many phonemes the
//! text has and returns that much silence. The phoneme step is injected, so a
//! real phonemizer can be swapped in without touching the engine.

use async_trait::async_trait;
use voxbridge_core::audio::samples_for_ms;
use voxbridge_core::{AudioChunk, Result};

use crate::types::{PhonemeBackend, VoiceEngine};

/// Treats every letter or digit as one phoneme
#[derive(Debug, Clone, Copy, Default)]
pub struct WordPhonemes;

#[async_trait]
impl PhonemeBackend for WordPhonemes {
    fn name(&self) -> &str {
        "letters"
    }

    async fn phonemize(&self, text: &str) -> Result<Vec<String>> {
        Ok(text
            .split_whitespace()
            .flat_map(|word| word.chars().filter(|c| c.is_alphanumeric()))
            .flat_map(|c| c.to_lowercase())
            .map(String::from)
            .collect())
    }
}

/// Silent TTS paced by phoneme count
#[derive(Debug, Clone)]
pub struct SilenceVoiceEngine<P> {
    phonemes: P,
    sample_rate: u32,
    ms_per_phoneme: u64,
}

impl<P: PhonemeBackend> SilenceVoiceEngine<P> {
    /// Engine producing mono audio at `sample_rate`
    pub fn new(phonemes: P, sample_rate: u32) -> Self {
        Self {
            phonemes,
            sample_rate,
            ms_per_phoneme: 60,
        }
    }

    /// Override the duration of each phoneme
    pub fn with_ms_per_phoneme(mut self, ms: u64) -> Self {
        self.ms_per_phoneme = ms;
        self
    }
}

#[async_trait]
impl<P: PhonemeBackend> VoiceEngine for SilenceVoiceEngine<P> {
    fn name(&self) -> &str {
        "silence"
    }

    async fn synthesize(&self, text: &str) -> Result<AudioChunk> {
        let phonemes = self.phonemes.phonemize(text).await?;
        let duration_ms = phonemes.len() as u64 * self.ms_per_phoneme;
        let samples = vec![0i16; samples_for_ms(self.sample_rate, duration_ms)];
        Ok(AudioChunk::from_samples(&samples, self.sample_rate, 1))
    }

    fn output_sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_word_phonemes() {
        let phonemes = WordPhonemes.phonemize("Hi, B2!").await.unwrap();
        assert_eq!(phonemes, vec!["h", "i", "b", "2"]);
        assert!(WordPhonemes.phonemize("  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_silence_length_follows_phonemes() {
        let tts = SilenceVoiceEngine::new(WordPhonemes, 16000).with_ms_per_phoneme(50);
        let chunk = tts.synthesize("abcd").await.unwrap();
        assert_eq!(chunk.duration_ms(), 200);
        assert_eq!(chunk.sample_rate, 16000);
        assert!(chunk.samples().iter().all(|&s| s == 0));

        assert!(tts.synthesize("").await.unwrap().is_empty());
    }
}
