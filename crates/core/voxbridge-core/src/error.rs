//! Error types for voxbridge

use thiserror::Error;

use crate::session::SessionState;

/// Errors raised by the frame codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The frame type or payload could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Fewer bytes were supplied than the header fields declare
    #[error("Truncated frame: needed {needed} bytes, only {available} available")]
    Truncated {
        /// Bytes required to finish reading the current field
        needed: usize,
        /// Bytes actually present in the buffer
        available: usize,
    },

    /// Length fields were readable but the content was not valid UTF-8/JSON
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl FrameError {
    /// Create an encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        FrameError::Encoding(msg.into())
    }

    /// Create a malformed frame error
    pub fn malformed(msg: impl Into<String>) -> Self {
        FrameError::Malformed(msg.into())
    }
}

/// Main error type for voxbridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Wire-level framing error
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A frame decoded fine but names a type nobody handles
    #[error("Unknown frame type: {0}")]
    UnknownFrameType(String),

    /// Frames arrived in an order the receiver does not accept
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session registry error
    #[error("Session error: {0}")]
    Session(String),

    /// Session state change that the lifecycle does not allow
    #[error("Invalid session transition for guild {guild_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Guild the session belongs to
        guild_id: u64,
        /// Current state
        from: SessionState,
        /// Requested state
        to: SessionState,
    },

    /// Voice gateway (Discord side) error
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// WebSocket / network error
    #[error("Network error: {0}")]
    Network(String),

    /// Transport is not connected
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// AI backend engine error (STT, LLM, TTS)
    #[error("Engine error: {0}")]
    Engine(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convenient Result type using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        BridgeError::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::Config(msg.into())
    }

    /// Create a session error
    pub fn session(msg: impl Into<String>) -> Self {
        BridgeError::Session(msg.into())
    }

    /// Create a gateway error
    pub fn gateway(msg: impl Into<String>) -> Self {
        BridgeError::Gateway(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        BridgeError::Network(msg.into())
    }

    /// Create a not-connected error
    pub fn not_connected(msg: impl Into<String>) -> Self {
        BridgeError::NotConnected(msg.into())
    }

    /// Create an engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        BridgeError::Engine(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        BridgeError::Timeout(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        BridgeError::Other(msg.into())
    }

    /// Whether the error came from the frame codec
    pub fn is_frame_error(&self) -> bool {
        matches!(self, BridgeError::Frame(_))
    }
}
