//! Voxbridge Core
//!
//! Shared building blocks for bridging a Discord voice channel to a local
//! speech/LLM backend:
//!
//! - Length-prefixed frame codec (`frame_type` + JSON payload)
//! - Typed voice frames (start, audio, text, end)
//! - Session registry with explicit lifecycle transitions
//! - PCM helpers, configuration, logging and retry policy
//!
//! # Example
//!
//! ```
//! use voxbridge_core::{AudioEncoding, StartParams, VoiceFrame};
//!
//! let frame = VoiceFrame::Start(StartParams::new(16000, 1));
//! let bytes = frame.encode(AudioEncoding::IntArray).unwrap();
//! assert_eq!(&bytes[..9], b"\x00\x00\x00\x05start");
//! assert_eq!(VoiceFrame::decode(&bytes).unwrap(), frame);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export commonly used types
pub use uuid::Uuid;

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod frames;
pub mod json;
pub mod logging;
pub mod resilience;
pub mod session;
pub mod transport;

pub use codec::{FrameCodec, Frames, RawFrame};
pub use config::{
    get_env_bool, get_env_int, get_env_or, load_env, load_env_from_path, AudioCaptureConfig,
    BridgeConfig, ConnectionConfig,
};
pub use error::{BridgeError, FrameError, Result};
pub use frames::{
    AudioChunk, AudioEncoding, FrameKind, StartParams, TextFrame, VoiceFrame, DEFAULT_CHANNELS,
    DEFAULT_SAMPLE_RATE,
};
pub use logging::init_logging;
pub use resilience::{retry_with_backoff, RetryConfig};
pub use session::{SessionEvent, SessionInfo, SessionRegistry, SessionState, VoiceSession};
pub use transport::{FrameSink, MemorySink};
