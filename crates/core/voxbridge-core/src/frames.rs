//! Typed voice frames carried inside the codec envelope
//!
//! A [`VoiceFrame`] is the single tagged format exchanged between the Discord
//! bridge and the backend. Each variant maps to one `frame_type` string and a
//! fixed set of payload keys.

use base64::Engine as _;
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::codec::{FrameCodec, RawFrame};
use crate::error::{BridgeError, FrameError, Result};

/// Default sample rate used across the bridge (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Default channel count
pub const DEFAULT_CHANNELS: u16 = 1;

/// The kinds of frame the protocol knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Session start / audio parameters
    Start,
    /// Captured audio travelling to the backend
    AudioInput,
    /// Synthesized audio travelling back to the bot
    AudioOutput,
    /// Text message in either direction
    Text,
    /// End of session
    End,
}

impl FrameKind {
    /// Wire identifier for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AudioInput => "audio_input",
            Self::AudioOutput => "audio_output",
            Self::Text => "text",
            Self::End => "end",
        }
    }

    /// Resolve a wire identifier, including the long-form names older
    /// producers used
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "start" | "pipecat.frames.frames.StartFrame" => Some(Self::Start),
            "audio_input" | "pipecat.frames.frames.InputAudioRawFrame" => Some(Self::AudioInput),
            "audio_output" | "pipecat.frames.frames.OutputAudioRawFrame" => Some(Self::AudioOutput),
            "text" | "pipecat.frames.frames.TextFrame" => Some(Self::Text),
            "end" | "pipecat.frames.frames.EndFrame" => Some(Self::End),
            _ => None,
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How audio bytes are written into the JSON payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioEncoding {
    /// JSON array of byte values, e.g. `[0, 255, 12]`
    #[default]
    IntArray,
    /// Standard base64 string
    Base64,
}

/// Parameters announced by a `Start` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartParams {
    /// Input sample rate in Hz
    pub sample_rate: u32,
    /// Input channel count
    pub channels: u16,
    /// Requested output sample rate, if different from input
    pub audio_out_sample_rate: Option<u32>,
    /// Whether the user may interrupt bot speech
    pub allow_interruptions: Option<bool>,
}

impl Default for StartParams {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            audio_out_sample_rate: None,
            allow_interruptions: None,
        }
    }
}

impl StartParams {
    /// Start parameters for the given input format
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            ..Default::default()
        }
    }

    /// Effective output sample rate
    pub fn output_sample_rate(&self) -> u32 {
        self.audio_out_sample_rate.unwrap_or(self.sample_rate)
    }
}

/// A chunk of 16-bit little-endian PCM audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Raw PCM bytes
    pub data: Vec<u8>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
}

impl AudioChunk {
    /// Wrap raw PCM bytes
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }

    /// Build a chunk from i16 samples
    pub fn from_samples(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        Self::new(crate::audio::samples_to_bytes(samples), sample_rate, channels)
    }

    /// Decode the PCM bytes into i16 samples (a trailing odd byte is dropped)
    pub fn samples(&self) -> Vec<i16> {
        crate::audio::bytes_to_samples(&self.data)
    }

    /// Duration of the chunk in milliseconds
    pub fn duration_ms(&self) -> u64 {
        let frame_bytes = 2 * self.channels.max(1) as u64;
        if self.sample_rate == 0 {
            return 0;
        }
        (self.data.len() as u64 / frame_bytes) * 1000 / self.sample_rate as u64
    }

    /// Whether the chunk carries no audio
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFrame {
    /// The text
    pub text: String,
}

impl TextFrame {
    /// Create a text frame
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A typed protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceFrame {
    /// Session start
    Start(StartParams),
    /// Audio captured by the bot
    AudioInput(AudioChunk),
    /// Audio synthesized by the backend
    AudioOutput(AudioChunk),
    /// Text
    Text(TextFrame),
    /// End of session
    End,
}

impl VoiceFrame {
    /// Convenience constructor for a text frame
    pub fn text(text: impl Into<String>) -> Self {
        VoiceFrame::Text(TextFrame::new(text))
    }

    /// The kind of this frame
    pub fn kind(&self) -> FrameKind {
        match self {
            VoiceFrame::Start(_) => FrameKind::Start,
            VoiceFrame::AudioInput(_) => FrameKind::AudioInput,
            VoiceFrame::AudioOutput(_) => FrameKind::AudioOutput,
            VoiceFrame::Text(_) => FrameKind::Text,
            VoiceFrame::End => FrameKind::End,
        }
    }

    /// Convert into the untyped envelope form
    pub fn to_raw(&self, encoding: AudioEncoding) -> RawFrame {
        let mut payload = Map::new();
        match self {
            VoiceFrame::Start(params) => {
                payload.insert("sample_rate".into(), params.sample_rate.into());
                payload.insert("channels".into(), params.channels.into());
                if let Some(rate) = params.audio_out_sample_rate {
                    payload.insert("audio_out_sample_rate".into(), rate.into());
                }
                if let Some(allow) = params.allow_interruptions {
                    payload.insert("allow_interruptions".into(), allow.into());
                }
            }
            VoiceFrame::AudioInput(chunk) | VoiceFrame::AudioOutput(chunk) => {
                payload.insert("data".into(), encode_audio(&chunk.data, encoding));
                payload.insert("sample_rate".into(), chunk.sample_rate.into());
                payload.insert("channels".into(), chunk.channels.into());
            }
            VoiceFrame::Text(text) => {
                payload.insert("text".into(), text.text.clone().into());
            }
            VoiceFrame::End => {}
        }
        RawFrame::new(self.kind().as_str(), Value::Object(payload))
    }

    /// Interpret an untyped envelope
    pub fn from_raw(raw: &RawFrame) -> Result<Self> {
        let kind = FrameKind::from_type_name(&raw.frame_type)
            .ok_or_else(|| BridgeError::UnknownFrameType(raw.frame_type.clone()))?;

        let payload = match &raw.payload {
            Value::Object(map) => map,
            Value::Null if kind == FrameKind::End => return Ok(VoiceFrame::End),
            other => {
                return Err(FrameError::malformed(format!(
                    "{} payload must be a JSON object, got {}",
                    kind,
                    json_type_name(other)
                ))
                .into())
            }
        };

        let frame = match kind {
            FrameKind::Start => VoiceFrame::Start(StartParams {
                sample_rate: read_u32(payload, &["sample_rate", "audio_in_sample_rate"])?
                    .unwrap_or(DEFAULT_SAMPLE_RATE),
                channels: read_u16(payload, &["channels", "num_channels"])?.unwrap_or(DEFAULT_CHANNELS),
                audio_out_sample_rate: read_u32(payload, &["audio_out_sample_rate"])?,
                allow_interruptions: match payload.get("allow_interruptions") {
                    None | Some(Value::Null) => None,
                    Some(Value::Bool(b)) => Some(*b),
                    Some(other) => {
                        return Err(FrameError::malformed(format!(
                            "allow_interruptions must be a boolean, got {}",
                            json_type_name(other)
                        ))
                        .into())
                    }
                },
            }),
            FrameKind::AudioInput => VoiceFrame::AudioInput(read_chunk(payload)?),
            FrameKind::AudioOutput => VoiceFrame::AudioOutput(read_chunk(payload)?),
            FrameKind::Text => VoiceFrame::Text(TextFrame {
                text: match payload.get("text") {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => {
                        return Err(FrameError::malformed(format!(
                            "text must be a string, got {}",
                            json_type_name(other)
                        ))
                        .into())
                    }
                },
            }),
            FrameKind::End => VoiceFrame::End,
        };
        Ok(frame)
    }

    /// Encode to wire bytes
    pub fn encode(&self, encoding: AudioEncoding) -> Result<Bytes> {
        Ok(FrameCodec::encode_raw(&self.to_raw(encoding))?)
    }

    /// Decode wire bytes holding exactly one frame
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let raw = FrameCodec::decode_exact(buf)?;
        Self::from_raw(&raw)
    }
}

fn encode_audio(data: &[u8], encoding: AudioEncoding) -> Value {
    match encoding {
        AudioEncoding::IntArray => Value::Array(data.iter().map(|&b| Value::from(b)).collect()),
        AudioEncoding::Base64 => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(data))
        }
    }
}

fn decode_audio(value: &Value) -> std::result::Result<Vec<u8>, FrameError> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| {
                        FrameError::malformed(format!("audio byte {} is not in 0..=255: {}", i, item))
                    })
            })
            .collect(),
        Value::String(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| FrameError::malformed(format!("audio is not valid base64: {}", e))),
        Value::Null => Ok(Vec::new()),
        other => Err(FrameError::malformed(format!(
            "audio must be an array or base64 string, got {}",
            json_type_name(other)
        ))),
    }
}

fn read_chunk(payload: &Map<String, Value>) -> Result<AudioChunk> {
    let data = match first_present(payload, &["data", "audio"]) {
        Some(value) => decode_audio(value)?,
        None => Vec::new(),
    };
    Ok(AudioChunk {
        data,
        sample_rate: read_u32(payload, &["sample_rate"])?.unwrap_or(DEFAULT_SAMPLE_RATE),
        channels: read_u16(payload, &["channels", "num_channels"])?.unwrap_or(DEFAULT_CHANNELS),
    })
}

fn first_present<'a>(payload: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| payload.get(*k))
        .find(|v| !v.is_null())
}

fn read_u32(payload: &Map<String, Value>, keys: &[&str]) -> Result<Option<u32>> {
    match first_present(payload, keys) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                FrameError::malformed(format!("{} must be an unsigned integer, got {}", keys[0], value))
                    .into()
            }),
    }
}

fn read_u16(payload: &Map<String, Value>, keys: &[&str]) -> Result<Option<u16>> {
    match read_u32(payload, keys)? {
        None => Ok(None),
        Some(n) => u16::try_from(n).map(Some).map_err(|_| {
            FrameError::malformed(format!("{} is out of range: {}", keys[0], n)).into()
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
