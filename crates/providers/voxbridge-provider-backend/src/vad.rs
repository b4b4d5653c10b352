//! Energy-based voice activity detection
//!
//! Timing is derived from sample counts, so the detector behaves the same
//! whether audio arrives in real time or in a burst.

use serde::{Deserialize, Serialize};
use tracing::debug;
use voxbridge_core::audio::{ms_for_samples, rms, samples_for_ms};

/// Upper bound on the buffer reserved up front, whatever the utterance limit
const MAX_PREALLOCATED_SAMPLES: usize = 48_000 * 5;

/// VAD tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS level above which a chunk counts as speech
    pub energy_threshold: f64,
    /// Quiet audio needed to end an utterance (ms)
    pub silence_ms: u64,
    /// Shorter utterances are dropped (ms)
    pub min_audio_ms: u64,
    /// Utterances are cut here even while speech continues (ms)
    pub max_utterance_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 400.0,
            silence_ms: 800,
            min_audio_ms: 400,
            max_utterance_ms: 30_000,
        }
    }
}

/// What a chunk of audio did to the detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech began with this chunk
    SpeechStarted,
    /// An utterance ended; carries its samples (trailing silence included)
    Utterance(Vec<i16>),
    /// An utterance ended but was too short to keep
    Discarded {
        /// Length of the dropped audio (ms)
        duration_ms: u64,
    },
}

/// Per-connection VAD state
#[derive(Debug)]
pub struct EnergyVad {
    config: VadConfig,
    sample_rate: u32,
    buffer: Vec<i16>,
    speaking: bool,
    silence_samples: usize,
}

impl EnergyVad {
    /// Detector for mono audio at `sample_rate`
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        let reserve =
            samples_for_ms(sample_rate, config.max_utterance_ms).min(MAX_PREALLOCATED_SAMPLES);
        Self {
            config,
            sample_rate,
            buffer: Vec::with_capacity(reserve),
            speaking: false,
            silence_samples: 0,
        }
    }

    /// Whether an utterance is in progress
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Milliseconds of audio currently buffered
    pub fn buffered_ms(&self) -> u64 {
        ms_for_samples(self.sample_rate, self.buffer.len())
    }

    /// Feed one chunk of mono samples
    pub fn push(&mut self, samples: &[i16]) -> Option<VadEvent> {
        if samples.is_empty() {
            return None;
        }

        let level = rms(samples);
        if level > self.config.energy_threshold {
            self.buffer.extend_from_slice(samples);
            self.silence_samples = 0;
            let started = !self.speaking;
            self.speaking = true;
            if self.buffered_ms() >= self.config.max_utterance_ms {
                debug!(buffered_ms = self.buffered_ms(), "Utterance hit length limit");
                return Some(self.finish());
            }
            if started {
                debug!(rms = level, "Speech started");
                return Some(VadEvent::SpeechStarted);
            }
            None
        } else if self.speaking {
            // Include trailing silence
            self.buffer.extend_from_slice(samples);
            self.silence_samples += samples.len();
            if self.buffered_ms() >= self.config.max_utterance_ms {
                debug!(buffered_ms = self.buffered_ms(), "Utterance hit length limit");
                return Some(self.finish());
            }
            if ms_for_samples(self.sample_rate, self.silence_samples) >= self.config.silence_ms {
                debug!(
                    silence_ms = ms_for_samples(self.sample_rate, self.silence_samples),
                    "Speech ended (VAD)"
                );
                return Some(self.finish());
            }
            None
        } else {
            None
        }
    }

    /// End any utterance in progress regardless of trailing silence
    pub fn flush(&mut self) -> Option<VadEvent> {
        if self.buffer.is_empty() {
            self.speaking = false;
            return None;
        }
        Some(self.finish())
    }

    fn finish(&mut self) -> VadEvent {
        self.speaking = false;
        self.silence_samples = 0;
        let audio = std::mem::take(&mut self.buffer);
        let duration_ms = ms_for_samples(self.sample_rate, audio.len());
        if duration_ms < self.config.min_audio_ms {
            debug!(duration_ms = duration_ms, "Utterance too short, discarding");
            VadEvent::Discarded { duration_ms }
        } else {
            VadEvent::Utterance(audio)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;

    fn loud(ms: u64) -> Vec<i16> {
        vec![2000; (RATE as u64 * ms / 1000) as usize]
    }

    fn quiet(ms: u64) -> Vec<i16> {
        vec![0; (RATE as u64 * ms / 1000) as usize]
    }

    #[test]
    fn test_utterance_after_silence() {
        let mut vad = EnergyVad::new(VadConfig::default(), RATE);
        assert_eq!(vad.push(&quiet(100)), None);
        assert_eq!(vad.push(&loud(100)), Some(VadEvent::SpeechStarted));
        for _ in 0..4 {
            assert_eq!(vad.push(&loud(100)), None);
        }
        for _ in 0..7 {
            assert_eq!(vad.push(&quiet(100)), None);
        }
        match vad.push(&quiet(100)) {
            Some(VadEvent::Utterance(samples)) => {
                assert_eq!(ms_for_samples(RATE, samples.len()), 1300);
            }
            other => panic!("expected utterance, got {:?}", other),
        }
        assert!(!vad.is_speaking());
        assert_eq!(vad.buffered_ms(), 0);
    }

    #[test]
    fn test_speech_resets_silence() {
        let mut vad = EnergyVad::new(VadConfig::default(), RATE);
        vad.push(&loud(500));
        vad.push(&quiet(700));
        vad.push(&loud(100));
        assert_eq!(vad.push(&quiet(700)), None);
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_short_blip_discarded() {
        let config = VadConfig {
            silence_ms: 100,
            min_audio_ms: 400,
            ..Default::default()
        };
        let mut vad = EnergyVad::new(config, RATE);
        vad.push(&loud(50));
        assert_eq!(
            vad.push(&quiet(100)),
            Some(VadEvent::Discarded { duration_ms: 150 })
        );
    }

    #[test]
    fn test_flush() {
        let mut vad = EnergyVad::new(VadConfig::default(), RATE);
        assert_eq!(vad.flush(), None);
        vad.push(&loud(500));
        assert!(matches!(vad.flush(), Some(VadEvent::Utterance(s)) if s.len() == 8000));
    }

    #[test]
    fn test_continuous_speech_is_cut_at_max_length() {
        let config = VadConfig {
            max_utterance_ms: 1000,
            ..Default::default()
        };
        let mut vad = EnergyVad::new(config, RATE);
        assert_eq!(vad.push(&loud(400)), Some(VadEvent::SpeechStarted));
        assert_eq!(vad.push(&loud(400)), None);
        match vad.push(&loud(400)) {
            Some(VadEvent::Utterance(samples)) => {
                assert_eq!(ms_for_samples(RATE, samples.len()), 1200);
            }
            other => panic!("expected utterance, got {:?}", other),
        }
        assert!(!vad.is_speaking());
        assert_eq!(vad.buffered_ms(), 0);

        // The next loud chunk opens a fresh utterance
        assert_eq!(vad.push(&loud(100)), Some(VadEvent::SpeechStarted));
    }

    #[test]
    fn test_preallocation_is_bounded() {
        let vad = EnergyVad::new(VadConfig::default(), u32::MAX);
        assert!(vad.buffer.capacity() <= MAX_PREALLOCATED_SAMPLES);
        assert_eq!(vad.buffered_ms(), 0);
    }
}
