//! Voice bridge
//!
//! Ties a guild's voice channel to a backend conversation. Captured Discord
//! audio goes out as `audio_input` frames; `audio_output` frames coming back
//! are queued for playback in the channel.
//!
//! Session state lives in the shared [`SessionRegistry`]:
//!
//! ```text
//! Idle/Disconnected -> Connecting -> Connected -> Disconnected
//!                          |
//!                          +-> Disconnected (join or backend failure)
//! ```

use crate::capture::CaptureBuffer;
use crate::connector::{BackendConnector, BackendLink};
use crate::gateway::VoiceGateway;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use voxbridge_core::{
    BridgeConfig, BridgeError, FrameSink, Result, SessionInfo, SessionRegistry, SessionState,
    StartParams, Uuid, VoiceFrame,
};

type LinkMap = Arc<Mutex<HashMap<u64, ActiveLink>>>;

struct ActiveLink {
    session_id: Uuid,
    sink: Arc<dyn FrameSink>,
    pump: JoinHandle<()>,
}

/// Bridges Discord voice channels to the backend, one conversation per guild
pub struct VoiceBridge<G, C> {
    gateway: Arc<G>,
    connector: C,
    registry: Arc<SessionRegistry>,
    config: BridgeConfig,
    links: LinkMap,
    capture: Mutex<HashMap<u64, CaptureBuffer>>,
}

impl<G, C> VoiceBridge<G, C>
where
    G: VoiceGateway + 'static,
    C: BackendConnector,
{
    /// Create a bridge with its own session registry
    pub fn new(gateway: Arc<G>, connector: C, config: BridgeConfig) -> Self {
        Self::with_registry(gateway, connector, config, Arc::new(SessionRegistry::new()))
    }

    /// Create a bridge sharing an existing session registry
    pub fn with_registry(
        gateway: Arc<G>,
        connector: C,
        config: BridgeConfig,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            gateway,
            connector,
            registry,
            config,
            links: Arc::new(Mutex::new(HashMap::new())),
            capture: Mutex::new(HashMap::new()),
        }
    }

    /// Session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Join `channel_id` and open a backend conversation for it
    ///
    /// `members` are the users already in the channel. Joining the channel
    /// the bot is already bridging is a no-op; joining another channel in the
    /// same guild leaves the current one first.
    pub async fn join(
        &self,
        guild_id: u64,
        channel_id: u64,
        members: impl IntoIterator<Item = u64>,
    ) -> Result<SessionInfo> {
        if self.registry.is_connected(guild_id) {
            if self.registry.channel(guild_id) == Some(channel_id) {
                debug!(guild_id = %guild_id, channel_id = %channel_id, "Already bridging this channel");
                return self.snapshot(guild_id);
            }
            info!(guild_id = %guild_id, channel_id = %channel_id, "Moving to another voice channel");
            self.leave(guild_id).await?;
        }

        let session_id = self.registry.begin_connect(guild_id, channel_id)?;
        info!(guild_id = %guild_id, channel_id = %channel_id, session_id = %session_id, "Joining voice channel");

        if let Err(e) = self.gateway.join(guild_id, channel_id).await {
            error!(guild_id = %guild_id, error = %e, "Failed to join voice channel");
            self.abandon(guild_id);
            return Err(e);
        }
        self.registry.set_members(guild_id, members)?;

        let link = match self.connector.connect(guild_id).await {
            Ok(link) => link,
            Err(e) => {
                error!(guild_id = %guild_id, error = %e, "Failed to connect to backend");
                self.leave_gateway(guild_id).await;
                self.abandon(guild_id);
                return Err(e);
            }
        };

        let start = VoiceFrame::Start(StartParams::new(
            self.config.audio.sample_rate,
            self.config.audio.channels,
        ));
        if let Err(e) = link.sink.send_frame(&start).await {
            error!(guild_id = %guild_id, error = %e, "Failed to start backend session");
            if let Err(e) = link.sink.close().await {
                debug!(guild_id = %guild_id, error = %e, "Closing backend link failed");
            }
            self.leave_gateway(guild_id).await;
            self.abandon(guild_id);
            return Err(e);
        }
        self.registry.record_sent(guild_id);
        if let Err(e) = self.registry.mark_connected(guild_id) {
            // A leave ran while the backend was connecting
            warn!(guild_id = %guild_id, error = %e, "Session ended during join, dropping backend link");
            if let Err(e) = link.sink.close().await {
                debug!(guild_id = %guild_id, error = %e, "Closing backend link failed");
            }
            self.leave_gateway(guild_id).await;
            return Err(e);
        }

        self.capture
            .lock()
            .insert(guild_id, CaptureBuffer::new(&self.config.audio));
        self.spawn_pump(guild_id, session_id, link);

        info!(guild_id = %guild_id, channel_id = %channel_id, "Voice bridge connected");
        self.snapshot(guild_id)
    }

    /// Forward 48kHz stereo audio a user spoke in `guild_id`
    ///
    /// Returns the number of `audio_input` frames sent. Audio is dropped
    /// unless the session is connected, listening is enabled and the
    /// speaker is someone other than the bot.
    pub async fn ingest_discord_audio(
        &self,
        guild_id: u64,
        user_id: u64,
        samples: &[i16],
    ) -> Result<usize> {
        if !self.config.listen_enabled
            || samples.is_empty()
            || self.registry.local_user() == Some(user_id)
            || !self.registry.is_connected(guild_id)
        {
            return Ok(0);
        }

        let chunks = match self.capture.lock().get_mut(&guild_id) {
            Some(buffer) => buffer.push(samples),
            None => return Ok(0),
        };
        if chunks.is_empty() {
            return Ok(0);
        }

        let sink = self
            .sink(guild_id)
            .ok_or_else(|| BridgeError::not_connected(format!("no backend link for guild {}", guild_id)))?;
        let count = chunks.len();
        for chunk in chunks {
            sink.send_frame(&VoiceFrame::AudioInput(chunk)).await?;
            self.registry.record_sent(guild_id);
        }
        debug!(guild_id = %guild_id, user_id = %user_id, chunks = count, "Forwarded captured audio");
        Ok(count)
    }

    /// Leave the guild's voice channel and end its backend conversation
    pub async fn leave(&self, guild_id: u64) -> Result<()> {
        let state = self.registry.state(guild_id);
        if !matches!(state, SessionState::Connecting | SessionState::Connected) {
            return Err(BridgeError::session(format!(
                "not in a voice channel in guild {}",
                guild_id
            )));
        }

        let remainder = self
            .capture
            .lock()
            .remove(&guild_id)
            .and_then(|mut buffer| buffer.flush());
        let link = self.links.lock().remove(&guild_id);

        if let Some(link) = link {
            if let Some(chunk) = remainder {
                if let Err(e) = link.sink.send_frame(&VoiceFrame::AudioInput(chunk)).await {
                    debug!(guild_id = %guild_id, error = %e, "Dropping buffered audio");
                }
            }
            if let Err(e) = link.sink.send_frame(&VoiceFrame::End).await {
                warn!(guild_id = %guild_id, error = %e, "Failed to send end frame");
            }
            if let Err(e) = link.sink.close().await {
                warn!(guild_id = %guild_id, error = %e, "Failed to close backend link");
            }
            link.pump.abort();
        }

        self.leave_gateway(guild_id).await;
        self.registry.mark_disconnected(guild_id)?;
        info!(guild_id = %guild_id, "Left voice channel");
        Ok(())
    }

    /// Apply a voice state change for `user_id`
    ///
    /// Returns true when the change made the bridge leave: either the bot
    /// itself was disconnected or moved, or everyone else left and
    /// `leave_when_alone` is set.
    pub async fn update_presence(
        &self,
        guild_id: u64,
        user_id: u64,
        channel_before: Option<u64>,
        channel_after: Option<u64>,
    ) -> Result<bool> {
        if channel_before == channel_after {
            return Ok(false);
        }
        if let Some(before) = channel_before {
            self.registry.member_left(guild_id, before, user_id);
        }
        if let Some(after) = channel_after {
            self.registry.member_joined(guild_id, after, user_id);
        }

        if !self.registry.is_connected(guild_id) {
            return Ok(false);
        }

        if self.registry.local_user() == Some(user_id) {
            if channel_after != self.registry.channel(guild_id) {
                warn!(guild_id = %guild_id, "Bot was removed from the voice channel");
                self.leave(guild_id).await?;
                return Ok(true);
            }
            return Ok(false);
        }

        if self.config.leave_when_alone && !self.registry.has_remote_users(guild_id) {
            info!(guild_id = %guild_id, "Everyone left the voice channel, leaving");
            self.leave(guild_id).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Leave every session idle for longer than the voice timeout
    pub async fn cleanup_idle(&self) -> Vec<u64> {
        let idle = self.registry.idle_sessions(self.config.voice_timeout());
        self.leave_each(idle, "idle").await
    }

    /// Leave every session where the bot is alone
    pub async fn cleanup_alone(&self) -> Vec<u64> {
        if !self.config.leave_when_alone {
            return Vec::new();
        }
        let alone = self.registry.alone_sessions();
        self.leave_each(alone, "alone").await
    }

    /// Leave every active session
    pub async fn shutdown(&self) {
        let active: Vec<u64> = self
            .registry
            .guilds()
            .into_iter()
            .filter(|g| {
                matches!(
                    self.registry.state(*g),
                    SessionState::Connecting | SessionState::Connected
                )
            })
            .collect();
        self.leave_each(active, "shutdown").await;
    }

    /// Snapshot of the guild's session
    pub fn status(&self, guild_id: u64) -> Option<SessionInfo> {
        self.registry.snapshot(guild_id)
    }

    async fn leave_each(&self, guilds: Vec<u64>, reason: &str) -> Vec<u64> {
        let mut left = Vec::new();
        for guild_id in guilds {
            info!(guild_id = %guild_id, reason = reason, "Leaving voice channel");
            match self.leave(guild_id).await {
                Ok(()) => left.push(guild_id),
                Err(e) => warn!(guild_id = %guild_id, error = %e, "Failed to leave voice channel"),
            }
        }
        left
    }

    fn sink(&self, guild_id: u64) -> Option<Arc<dyn FrameSink>> {
        self.links.lock().get(&guild_id).map(|l| l.sink.clone())
    }

    fn snapshot(&self, guild_id: u64) -> Result<SessionInfo> {
        self.registry
            .snapshot(guild_id)
            .ok_or_else(|| BridgeError::session(format!("no session for guild {}", guild_id)))
    }

    async fn leave_gateway(&self, guild_id: u64) {
        if let Err(e) = self.gateway.leave(guild_id).await {
            warn!(guild_id = %guild_id, error = %e, "Failed to leave voice gateway");
        }
    }

    fn abandon(&self, guild_id: u64) {
        if let Err(e) = self.registry.mark_disconnected(guild_id) {
            warn!(guild_id = %guild_id, error = %e, "Failed to mark session disconnected");
        }
    }

    fn spawn_pump(&self, guild_id: u64, session_id: Uuid, link: BackendLink) {
        let BackendLink { sink, frames } = link;
        // Insert under the lock so a pump that finishes at once still finds its link
        let mut links = self.links.lock();
        let pump = tokio::spawn(pump_backend_frames(
            guild_id,
            session_id,
            frames,
            self.gateway.clone(),
            self.registry.clone(),
            self.links.clone(),
        ));
        links.insert(
            guild_id,
            ActiveLink {
                session_id,
                sink,
                pump,
            },
        );
    }
}

/// Play and log backend frames until the link closes for good
///
/// If the link dies while the session is still ours, the bridge leaves the
/// channel.
async fn pump_backend_frames<G: VoiceGateway>(
    guild_id: u64,
    session_id: Uuid,
    mut frames: mpsc::Receiver<VoiceFrame>,
    gateway: Arc<G>,
    registry: Arc<SessionRegistry>,
    links: LinkMap,
) {
    while let Some(frame) = frames.recv().await {
        registry.record_received(guild_id);
        match frame {
            VoiceFrame::AudioOutput(chunk) => {
                if let Err(e) = gateway.play(guild_id, chunk).await {
                    warn!(guild_id = %guild_id, error = %e, "Failed to play backend audio");
                }
            }
            VoiceFrame::Text(text) => {
                info!(guild_id = %guild_id, text = %text.text, "Backend reply");
            }
            other => {
                debug!(guild_id = %guild_id, kind = other.kind().as_str(), "Ignoring backend frame");
            }
        }
    }

    let orphaned = {
        let mut links = links.lock();
        let ours = links
            .get(&guild_id)
            .is_some_and(|link| link.session_id == session_id);
        if ours {
            links.remove(&guild_id)
        } else {
            None
        }
    };
    if let Some(link) = orphaned {
        warn!(guild_id = %guild_id, "Backend connection lost, leaving voice channel");
        if let Err(e) = link.sink.close().await {
            debug!(guild_id = %guild_id, error = %e, "Closing backend link failed");
        }
        if let Err(e) = gateway.leave(guild_id).await {
            warn!(guild_id = %guild_id, error = %e, "Failed to leave voice gateway");
        }
        if let Err(e) = registry.mark_disconnected(guild_id) {
            warn!(guild_id = %guild_id, error = %e, "Failed to mark session disconnected");
        }
    }
}
