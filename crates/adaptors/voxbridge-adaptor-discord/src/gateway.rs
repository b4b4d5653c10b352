//! Voice gateway seam
//!
//! Everything the bridge needs from Discord's voice side. The live
//! implementation sits on songbird (`voice` feature); tests use a mock.

use async_trait::async_trait;
use voxbridge_core::{AudioChunk, Result};

/// Joins, leaves and plays audio in guild voice channels
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Join `channel_id` in `guild_id`, moving if already connected elsewhere
    async fn join(&self, guild_id: u64, channel_id: u64) -> Result<()>;

    /// Leave the voice channel in `guild_id`
    async fn leave(&self, guild_id: u64) -> Result<()>;

    /// Queue audio for playback after anything already queued
    async fn play(&self, guild_id: u64, chunk: AudioChunk) -> Result<()>;
}
