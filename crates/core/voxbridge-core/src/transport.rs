//! Outbound frame transport

use async_trait::async_trait;

use crate::frames::VoiceFrame;
use crate::Result;

/// Anything that can carry frames to the backend
///
/// Implemented by the WebSocket client; tests use an in-memory sink.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one frame
    async fn send_frame(&self, frame: &VoiceFrame) -> Result<()>;

    /// Close the transport; further sends fail
    async fn close(&self) -> Result<()>;

    /// Whether the transport is currently usable
    fn is_open(&self) -> bool;
}

/// A sink that records frames in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: parking_lot::Mutex<Vec<VoiceFrame>>,
    closed: std::sync::atomic::AtomicBool,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent so far
    pub fn frames(&self) -> Vec<VoiceFrame> {
        self.frames.lock().clone()
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&self, frame: &VoiceFrame) -> Result<()> {
        if !self.is_open() {
            return Err(crate::BridgeError::not_connected("memory sink closed"));
        }
        self.frames.lock().push(frame.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}
