//! Songbird voice gateway and receiver

use crate::gateway::VoiceGateway;
use async_trait::async_trait;
use parking_lot::RwLock;
use serenity::model::id::{ChannelId, GuildId};
use songbird::events::context_data::VoiceTick;
use songbird::input::{Input, RawAdapter};
use songbird::{CoreEvent, Event, EventContext, EventHandler as SongbirdEventHandler, Songbird};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxbridge_core::audio::{mix_into, DISCORD_CHANNELS, DISCORD_SAMPLE_RATE};
use voxbridge_core::{AudioChunk, BridgeError, Result};

/// Samples in one 20ms voice tick of 48kHz stereo
const TICK_SAMPLES: usize = (DISCORD_SAMPLE_RATE as usize / 50) * DISCORD_CHANNELS as usize;

/// Silent ticks forwarded after speech so the backend can detect its end
const SILENCE_TAIL_TICKS: u32 = 75;

/// Audio heard in a guild during one voice tick
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    /// Guild the audio was heard in
    pub guild_id: u64,
    /// Speaker; the first one heard when several talk at once, 0 for silence
    pub user_id: u64,
    /// 48kHz stereo samples
    pub samples: Vec<i16>,
}

/// [`VoiceGateway`] backed by songbird
pub struct SongbirdGateway {
    songbird: Arc<Songbird>,
    captured: mpsc::Sender<CapturedAudio>,
}

impl SongbirdGateway {
    /// Create a gateway; received audio is sent to `captured`
    pub fn new(songbird: Arc<Songbird>, captured: mpsc::Sender<CapturedAudio>) -> Self {
        Self { songbird, captured }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn join(&self, guild_id: u64, channel_id: u64) -> Result<()> {
        let call = self
            .songbird
            .join(GuildId::new(guild_id), ChannelId::new(channel_id))
            .await
            .map_err(|e| BridgeError::gateway(format!("Failed to join voice channel: {}", e)))?;

        let receiver = VoiceReceiver::new(guild_id, self.captured.clone());
        let mut call = call.lock().await;
        call.remove_all_global_events();
        call.add_global_event(Event::Core(CoreEvent::SpeakingStateUpdate), receiver.clone());
        call.add_global_event(Event::Core(CoreEvent::VoiceTick), receiver);
        info!(guild_id = %guild_id, channel_id = %channel_id, "Voice receiver registered");
        Ok(())
    }

    async fn leave(&self, guild_id: u64) -> Result<()> {
        self.songbird
            .remove(GuildId::new(guild_id))
            .await
            .map_err(|e| BridgeError::gateway(format!("Failed to leave voice channel: {}", e)))
    }

    async fn play(&self, guild_id: u64, chunk: AudioChunk) -> Result<()> {
        let call = self
            .songbird
            .get(GuildId::new(guild_id))
            .ok_or_else(|| BridgeError::not_connected(format!("no voice call in guild {}", guild_id)))?;
        let input = pcm_input(&chunk);
        call.lock().await.enqueue_input(input).await;
        debug!(guild_id = %guild_id, duration_ms = chunk.duration_ms(), "Queued backend audio");
        Ok(())
    }
}

/// Wrap 16-bit PCM as a songbird input (interleaved f32 for `RawAdapter`)
fn pcm_input(chunk: &AudioChunk) -> Input {
    let floats: Vec<u8> = chunk
        .samples()
        .into_iter()
        .flat_map(|s| (s as f32 / 32768.0).to_le_bytes())
        .collect();
    RawAdapter::new(
        Cursor::new(floats),
        chunk.sample_rate,
        u32::from(chunk.channels.max(1)),
    )
    .into()
}

/// Maps SSRCs to users and forwards decoded audio every voice tick
#[derive(Clone)]
struct VoiceReceiver {
    guild_id: u64,
    ssrc_users: Arc<RwLock<HashMap<u32, u64>>>,
    silent_ticks: Arc<AtomicU32>,
    captured: mpsc::Sender<CapturedAudio>,
}

impl VoiceReceiver {
    fn new(guild_id: u64, captured: mpsc::Sender<CapturedAudio>) -> Self {
        Self {
            guild_id,
            ssrc_users: Arc::new(RwLock::new(HashMap::new())),
            silent_ticks: Arc::new(AtomicU32::new(SILENCE_TAIL_TICKS)),
            captured,
        }
    }

    fn forward(&self, user_id: u64, samples: Vec<i16>) {
        let audio = CapturedAudio {
            guild_id: self.guild_id,
            user_id,
            samples,
        };
        if let Err(e) = self.captured.try_send(audio) {
            debug!(guild_id = %self.guild_id, error = %e, "Dropping captured audio");
        }
    }

    fn on_tick(&self, tick: &VoiceTick) {
        let ssrc_users = self.ssrc_users.read();
        let mut mixed = Vec::new();
        let mut speaker = None;
        for (&ssrc, data) in tick.speaking.iter() {
            let Some(audio) = &data.decoded_voice else {
                continue;
            };
            if audio.is_empty() {
                continue;
            }
            mix_into(&mut mixed, audio);
            if speaker.is_none() {
                speaker = Some(ssrc_users.get(&ssrc).copied().unwrap_or(u64::from(ssrc)));
            }
        }
        drop(ssrc_users);

        match speaker {
            Some(user_id) => {
                self.silent_ticks.store(0, Ordering::Relaxed);
                self.forward(user_id, mixed);
            }
            None => {
                let silent = self.silent_ticks.fetch_add(1, Ordering::Relaxed);
                if silent < SILENCE_TAIL_TICKS {
                    self.forward(0, vec![0; TICK_SAMPLES]);
                } else {
                    self.silent_ticks.store(SILENCE_TAIL_TICKS, Ordering::Relaxed);
                }
            }
        }
    }
}

#[async_trait]
impl SongbirdEventHandler for VoiceReceiver {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::VoiceTick(tick) => self.on_tick(tick),
            EventContext::SpeakingStateUpdate(state) => {
                if let Some(user) = state.user_id {
                    let user_id = u64::from(user.0);
                    debug!(guild_id = %self.guild_id, ssrc = %state.ssrc, user_id = %user_id, "Speaker mapped");
                    self.ssrc_users.write().insert(state.ssrc, user_id);
                }
            }
            _ => {}
        }
        None
    }
}

/// Forward captured audio into the bridge until the channel closes
pub(crate) async fn forward_captured_audio<G, C>(
    bridge: Arc<crate::VoiceBridge<G, C>>,
    mut captured: mpsc::Receiver<CapturedAudio>,
) where
    G: VoiceGateway + 'static,
    C: crate::BackendConnector,
{
    while let Some(audio) = captured.recv().await {
        if let Err(e) = bridge
            .ingest_discord_audio(audio.guild_id, audio.user_id, &audio.samples)
            .await
        {
            warn!(guild_id = %audio.guild_id, error = %e, "Failed to forward captured audio");
        }
    }
}
