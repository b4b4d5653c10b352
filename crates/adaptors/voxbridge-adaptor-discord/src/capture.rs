//! Per-guild capture buffering
//!
//! Discord delivers 20ms of 48kHz stereo per voice tick. The backend wants a
//! steady stream of `chunk_ms` chunks in the announced capture format.

use voxbridge_core::audio::{discord_to, samples_for_ms};
use voxbridge_core::{AudioCaptureConfig, AudioChunk};

/// Accumulates converted Discord audio and cuts it into fixed-size chunks
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    sample_rate: u32,
    channels: u16,
    chunk_len: usize,
    pending: Vec<i16>,
}

impl CaptureBuffer {
    /// Create a buffer for the given capture settings
    pub fn new(config: &AudioCaptureConfig) -> Self {
        let frames = samples_for_ms(config.sample_rate, config.chunk_ms).max(1);
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            chunk_len: frames * config.channels.max(1) as usize,
            pending: Vec::new(),
        }
    }

    /// Add 48kHz stereo samples; returns every chunk that is now complete
    ///
    /// Audio is dropped when the capture format cannot be produced from
    /// Discord's format.
    pub fn push(&mut self, discord_samples: &[i16]) -> Vec<AudioChunk> {
        let Some(converted) = discord_to(discord_samples, self.sample_rate, self.channels) else {
            return Vec::new();
        };
        self.pending.extend_from_slice(&converted);

        let mut chunks = Vec::new();
        while self.pending.len() >= self.chunk_len {
            let rest = self.pending.split_off(self.chunk_len);
            let full = std::mem::replace(&mut self.pending, rest);
            chunks.push(AudioChunk::from_samples(&full, self.sample_rate, self.channels));
        }
        chunks
    }

    /// Take whatever is buffered as a final short chunk
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(AudioChunk::from_samples(&rest, self.sample_rate, self.channels))
    }

    /// Buffered samples not yet sent
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One Discord voice tick: 20ms of 48kHz stereo
    fn tick(value: i16) -> Vec<i16> {
        vec![value; 960 * 2]
    }

    #[test]
    fn test_chunks_every_100ms() {
        let mut buffer = CaptureBuffer::new(&AudioCaptureConfig::default());
        for _ in 0..4 {
            assert!(buffer.push(&tick(100)).is_empty());
        }
        let chunks = buffer.push(&tick(100));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sample_rate, 16000);
        assert_eq!(chunks[0].channels, 1);
        assert_eq!(chunks[0].duration_ms(), 100);
        assert_eq!(chunks[0].samples(), vec![100; 1600]);
        assert_eq!(buffer.pending_samples(), 0);
    }

    #[test]
    fn test_flush_returns_remainder() {
        let mut buffer = CaptureBuffer::new(&AudioCaptureConfig::default());
        buffer.push(&tick(7));
        let chunk = buffer.flush().unwrap();
        assert_eq!(chunk.duration_ms(), 20);
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn test_stereo_passthrough_format() {
        let config = AudioCaptureConfig {
            sample_rate: 48000,
            channels: 2,
            chunk_ms: 20,
        };
        let mut buffer = CaptureBuffer::new(&config);
        let chunks = buffer.push(&tick(3));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples().len(), 1920);
    }

    #[test]
    fn test_unsupported_format_drops_audio() {
        let config = AudioCaptureConfig {
            sample_rate: 44100,
            channels: 1,
            chunk_ms: 20,
        };
        let mut buffer = CaptureBuffer::new(&config);
        assert!(buffer.push(&tick(3)).is_empty());
        assert_eq!(buffer.pending_samples(), 0);
    }
}
