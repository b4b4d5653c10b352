//! Per-connection voice pipeline: VAD -> STT -> LLM -> TTS

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxbridge_core::audio::{samples_for_ms, stereo_to_mono};
use voxbridge_core::{AudioChunk, BridgeError, Result, StartParams, VoiceFrame};

use crate::types::{ChatMessage, EngineError, Engines};
use crate::vad::{EnergyVad, VadConfig, VadEvent};

/// Capture rates a session may announce
pub const SUPPORTED_SAMPLE_RATES: RangeInclusive<u32> = 8_000..=48_000;

/// System prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant connected via WebSocket.";

/// Pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// First message of every conversation
    pub system_prompt: String,
    /// Voice activity detection
    pub vad: VadConfig,
    /// Longest `audio_output` frame emitted (ms)
    pub output_chunk_ms: u64,
    /// Conversation turns kept besides the system prompt
    pub max_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            vad: VadConfig::default(),
            output_chunk_ms: 100,
            max_history: 20,
        }
    }
}

/// Conversation state for one client connection
pub struct VoicePipeline {
    id: Uuid,
    engines: Engines,
    config: PipelineConfig,
    params: Option<StartParams>,
    vad: Option<EnergyVad>,
    history: Vec<ChatMessage>,
    finished: bool,
    utterances: u64,
}

impl VoicePipeline {
    /// Create a pipeline waiting for its `start` frame
    pub fn new(engines: Engines, config: PipelineConfig) -> Self {
        let history = vec![ChatMessage::system(config.system_prompt.clone())];
        Self {
            id: Uuid::new_v4(),
            engines,
            config,
            params: None,
            vad: None,
            history,
            finished: false,
            utterances: 0,
        }
    }

    /// Identifier used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a `start` frame was accepted
    pub fn is_started(&self) -> bool {
        self.params.is_some()
    }

    /// Whether an `end` frame was processed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Conversation so far, system prompt first
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Utterances answered so far
    pub fn utterances(&self) -> u64 {
        self.utterances
    }

    /// Process one inbound frame and return the frames to send back
    pub async fn handle(&mut self, frame: VoiceFrame) -> Result<Vec<VoiceFrame>> {
        if self.finished {
            return Err(BridgeError::protocol(format!(
                "{} frame after end of session",
                frame.kind()
            )));
        }

        match frame {
            VoiceFrame::Start(params) => self.start(params),
            VoiceFrame::End => {
                let pending = self.vad.as_mut().and_then(EnergyVad::flush);
                let replies = match pending {
                    Some(VadEvent::Utterance(samples)) => self.answer_audio(&samples).await?,
                    _ => Vec::new(),
                };
                self.finished = true;
                info!(pipeline = %self.id, utterances = self.utterances, "Session ended by client");
                Ok(replies)
            }
            VoiceFrame::AudioInput(chunk) => {
                let params = self.require_started("audio_input")?;
                if chunk.sample_rate != params.sample_rate {
                    return Err(BridgeError::protocol(format!(
                        "audio at {} Hz but session started at {} Hz",
                        chunk.sample_rate, params.sample_rate
                    )));
                }
                if chunk.channels != params.channels {
                    return Err(BridgeError::protocol(format!(
                        "{}-channel audio but session started with {} channels",
                        chunk.channels, params.channels
                    )));
                }
                let samples = mono_samples(&chunk)?;
                let event = self.vad.as_mut().and_then(|vad| vad.push(&samples));
                match event {
                    Some(VadEvent::Utterance(utterance)) => self.answer_audio(&utterance).await,
                    Some(VadEvent::SpeechStarted) => {
                        debug!(pipeline = %self.id, "Speech started");
                        Ok(Vec::new())
                    }
                    Some(VadEvent::Discarded { duration_ms }) => {
                        debug!(pipeline = %self.id, duration_ms = duration_ms, "Dropped short utterance");
                        Ok(Vec::new())
                    }
                    None => Ok(Vec::new()),
                }
            }
            VoiceFrame::Text(text) => {
                self.require_started("text")?;
                self.answer_text(text.text).await
            }
            VoiceFrame::AudioOutput(_) => Err(BridgeError::protocol(
                "audio_output frames only travel from backend to client",
            )),
        }
    }

    fn start(&mut self, params: StartParams) -> Result<Vec<VoiceFrame>> {
        if self.params.is_some() {
            return Err(BridgeError::protocol("session already started"));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&params.sample_rate) {
            return Err(BridgeError::protocol(format!(
                "start frame sample rate {} Hz is outside {}..={} Hz",
                params.sample_rate,
                SUPPORTED_SAMPLE_RATES.start(),
                SUPPORTED_SAMPLE_RATES.end()
            )));
        }
        if params.output_sample_rate() != self.engines.tts.output_sample_rate() {
            warn!(
                pipeline = %self.id,
                requested = params.output_sample_rate(),
                produced = self.engines.tts.output_sample_rate(),
                "Output sample rate differs from TTS engine; audio is sent unconverted"
            );
        }
        info!(
            pipeline = %self.id,
            sample_rate = params.sample_rate,
            channels = params.channels,
            "Session started"
        );
        self.vad = Some(EnergyVad::new(self.config.vad.clone(), params.sample_rate));
        self.params = Some(params);
        Ok(Vec::new())
    }

    fn require_started(&self, what: &str) -> Result<StartParams> {
        self.params
            .clone()
            .ok_or_else(|| BridgeError::protocol(format!("{} frame before start", what)))
    }

    async fn answer_audio(&mut self, samples: &[i16]) -> Result<Vec<VoiceFrame>> {
        let sample_rate = self
            .params
            .as_ref()
            .map(|p| p.sample_rate)
            .unwrap_or(voxbridge_core::DEFAULT_SAMPLE_RATE);
        let transcript = self.engines.stt.transcribe(samples, sample_rate).await?;
        info!(pipeline = %self.id, transcript = %transcript, "Transcribed utterance");
        self.answer_text(transcript).await
    }

    async fn answer_text(&mut self, text: String) -> Result<Vec<VoiceFrame>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        self.history.push(ChatMessage::user(text));
        self.trim_history();

        let reply = self.engines.llm.respond(&self.history).await?;
        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Ok(Vec::new());
        }
        self.history.push(ChatMessage::assistant(reply.clone()));
        self.trim_history();
        self.utterances += 1;

        let audio = self.engines.tts.synthesize(&reply).await?;
        let mut frames = vec![VoiceFrame::text(reply)];
        frames.extend(
            split_chunk(&audio, self.config.output_chunk_ms)
                .into_iter()
                .map(VoiceFrame::AudioOutput),
        );
        debug!(pipeline = %self.id, frames = frames.len(), "Reply ready");
        Ok(frames)
    }

    fn trim_history(&mut self) {
        // Index 0 is the system prompt
        let turns = self.history.len().saturating_sub(1);
        if turns > self.config.max_history {
            let excess = turns - self.config.max_history;
            self.history.drain(1..1 + excess);
        }
    }
}

fn mono_samples(chunk: &AudioChunk) -> Result<Vec<i16>> {
    match chunk.channels {
        1 => Ok(chunk.samples()),
        2 => Ok(stereo_to_mono(&chunk.samples())),
        n => Err(EngineError::Unsupported(format!("{}-channel audio", n)).into()),
    }
}

/// Split audio into chunks of at most `chunk_ms`
pub fn split_chunk(audio: &AudioChunk, chunk_ms: u64) -> Vec<AudioChunk> {
    if audio.is_empty() {
        return Vec::new();
    }
    let frame_bytes = 2 * audio.channels.max(1) as usize;
    let chunk_bytes = (samples_for_ms(audio.sample_rate, chunk_ms) * frame_bytes).max(frame_bytes);
    audio
        .data
        .chunks(chunk_bytes)
        .map(|bytes| AudioChunk::new(bytes.to_vec(), audio.sample_rate, audio.channels))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::placeholder_engines;

    fn pipeline() -> VoicePipeline {
        VoicePipeline::new(placeholder_engines("hello bot", 16000), PipelineConfig::default())
    }

    fn loud(ms: u64) -> VoiceFrame {
        VoiceFrame::AudioInput(AudioChunk::from_samples(
            &vec![3000i16; samples_for_ms(16000, ms)],
            16000,
            1,
        ))
    }

    fn quiet(ms: u64) -> VoiceFrame {
        VoiceFrame::AudioInput(AudioChunk::from_samples(
            &vec![0i16; samples_for_ms(16000, ms)],
            16000,
            1,
        ))
    }

    #[tokio::test]
    async fn test_audio_before_start_is_protocol_error() {
        let mut p = pipeline();
        let err = p.handle(loud(100)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
        assert!(p.handle(VoiceFrame::text("hi")).await.is_err());
    }

    #[tokio::test]
    async fn test_full_utterance_produces_reply() {
        let mut p = pipeline();
        p.handle(VoiceFrame::Start(StartParams::new(16000, 1))).await.unwrap();
        for _ in 0..5 {
            assert!(p.handle(loud(100)).await.unwrap().is_empty());
        }
        let mut replies = Vec::new();
        for _ in 0..8 {
            replies.extend(p.handle(quiet(100)).await.unwrap());
        }

        assert_eq!(replies[0], VoiceFrame::text("Response to: hello bot"));
        let audio: Vec<_> = replies[1..]
            .iter()
            .map(|f| match f {
                VoiceFrame::AudioOutput(chunk) => chunk.duration_ms(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert!(!audio.is_empty());
        assert!(audio.iter().all(|&ms| ms <= 100));
        assert_eq!(p.utterances(), 1);
        assert_eq!(p.history().len(), 3);
    }

    #[tokio::test]
    async fn test_text_skips_transcription() {
        let mut p = pipeline();
        p.handle(VoiceFrame::Start(StartParams::default())).await.unwrap();
        let replies = p.handle(VoiceFrame::text("what time is it")).await.unwrap();
        assert_eq!(replies[0], VoiceFrame::text("Response to: what time is it"));
        assert!(p.handle(VoiceFrame::text("   ")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_flushes_pending_speech() {
        let mut p = pipeline();
        p.handle(VoiceFrame::Start(StartParams::default())).await.unwrap();
        p.handle(loud(500)).await.unwrap();
        let replies = p.handle(VoiceFrame::End).await.unwrap();
        assert_eq!(replies[0], VoiceFrame::text("Response to: hello bot"));
        assert!(p.is_finished());
        assert!(p.handle(loud(100)).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_start_and_rate_mismatch() {
        let mut p = pipeline();
        p.handle(VoiceFrame::Start(StartParams::default())).await.unwrap();
        assert!(p.handle(VoiceFrame::Start(StartParams::default())).await.is_err());

        let wrong_rate = VoiceFrame::AudioInput(AudioChunk::from_samples(&[0; 480], 48000, 1));
        assert!(p.handle(wrong_rate).await.is_err());
    }

    #[tokio::test]
    async fn test_start_rejects_unsupported_sample_rates() {
        for rate in [0, 7_999, 48_001, u32::MAX] {
            let mut p = pipeline();
            let err = p
                .handle(VoiceFrame::Start(StartParams::new(rate, 1)))
                .await
                .unwrap_err();
            assert!(matches!(err, BridgeError::Protocol(_)), "rate {}", rate);
            assert!(!p.is_started());
        }
        for rate in [8_000, 48_000] {
            let mut p = pipeline();
            p.handle(VoiceFrame::Start(StartParams::new(rate, 1))).await.unwrap();
            assert!(p.is_started());
        }
    }

    #[tokio::test]
    async fn test_channel_mismatch_is_protocol_error() {
        let mut p = pipeline();
        p.handle(VoiceFrame::Start(StartParams::new(16000, 1))).await.unwrap();
        let stereo = VoiceFrame::AudioInput(AudioChunk::from_samples(&[3000; 3200], 16000, 2));
        let err = p.handle(stereo).await.unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));

        let mut p = pipeline();
        p.handle(VoiceFrame::Start(StartParams::new(16000, 2))).await.unwrap();
        let mono = VoiceFrame::AudioInput(AudioChunk::from_samples(&[3000; 1600], 16000, 1));
        let err = p.handle(mono).await.unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
        let stereo = VoiceFrame::AudioInput(AudioChunk::from_samples(&[3000; 3200], 16000, 2));
        assert_eq!(p.handle(stereo).await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = PipelineConfig {
            max_history: 4,
            ..Default::default()
        };
        let mut p = VoicePipeline::new(placeholder_engines("x", 16000), config);
        p.handle(VoiceFrame::Start(StartParams::default())).await.unwrap();
        for i in 0..5 {
            p.handle(VoiceFrame::text(format!("turn {}", i))).await.unwrap();
        }
        assert_eq!(p.history().len(), 5);
        assert_eq!(p.history()[0], ChatMessage::system(DEFAULT_SYSTEM_PROMPT));
        assert_eq!(p.history()[1], ChatMessage::user("turn 3"));
    }

    #[test]
    fn test_split_chunk() {
        let audio = AudioChunk::from_samples(&vec![0i16; 4000], 16000, 1);
        let parts = split_chunk(&audio, 100);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].data.len(), 3200);
        assert_eq!(parts[2].data.len(), 1600);
        assert!(split_chunk(&AudioChunk::new(Vec::new(), 16000, 1), 100).is_empty());
    }
}
