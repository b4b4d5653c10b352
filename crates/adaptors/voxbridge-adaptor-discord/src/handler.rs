//! Discord event handler and client startup

use crate::bridge::VoiceBridge;
use crate::connector::WebSocketConnector;
use crate::voice::{forward_captured_audio, SongbirdGateway};
use parking_lot::RwLock;
use serenity::async_trait;
use serenity::client::{Client, Context, EventHandler};
use serenity::model::channel::Message;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::guild::Guild;
use serenity::model::voice::VoiceState;
use songbird::driver::DecodeMode;
use songbird::serenity::SerenityInit;
use songbird::Songbird;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use voxbridge_core::{BridgeConfig, BridgeError, Result, SessionInfo};

/// The bridge as wired to Discord
pub type DiscordBridge = VoiceBridge<SongbirdGateway, WebSocketConnector>;

const CAPTURE_CHANNEL_CAPACITY: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Serenity event handler: text commands and voice presence
pub struct Handler {
    bridge: Arc<DiscordBridge>,
    prefix: String,
    /// (guild, user) -> voice channel, kept from gateway events
    voice_states: RwLock<HashMap<(u64, u64), u64>>,
}

impl Handler {
    /// Create a handler driving `bridge`
    pub fn new(bridge: Arc<DiscordBridge>, prefix: impl Into<String>) -> Self {
        Self {
            bridge,
            prefix: prefix.into(),
            voice_states: RwLock::new(HashMap::new()),
        }
    }

    fn channel_of(&self, guild_id: u64, user_id: u64) -> Option<u64> {
        self.voice_states.read().get(&(guild_id, user_id)).copied()
    }

    fn members_of(&self, guild_id: u64, channel_id: u64) -> Vec<u64> {
        self.voice_states
            .read()
            .iter()
            .filter(|((g, _), c)| *g == guild_id && **c == channel_id)
            .map(|((_, u), _)| *u)
            .collect()
    }

    async fn run_command(&self, command: &str, guild_id: u64, user_id: u64) -> String {
        match command {
            "join" => {
                let Some(channel_id) = self.channel_of(guild_id, user_id) else {
                    return "Join a voice channel first.".to_string();
                };
                let members = self.members_of(guild_id, channel_id);
                match self.bridge.join(guild_id, channel_id, members).await {
                    Ok(_) => format!("Joined <#{}>. Listening.", channel_id),
                    Err(e) => format!("Could not join: {}", e),
                }
            }
            "leave" => match self.bridge.leave(guild_id).await {
                Ok(()) => "Left the voice channel.".to_string(),
                Err(e) => format!("Could not leave: {}", e),
            },
            "status" => match self.bridge.status(guild_id) {
                Some(info) => describe(&info),
                None => "Not in a voice channel.".to_string(),
            },
            _ => format!(
                "Unknown command. Try {p}join, {p}leave or {p}status.",
                p = self.prefix
            ),
        }
    }
}

fn describe(info: &SessionInfo) -> String {
    let channel = info
        .channel_id
        .map(|c| format!("<#{}>", c))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "State: {:?} | Channel: {} | Users: {} ({} others) | Frames sent: {} | Frames received: {}",
        info.state,
        channel,
        info.total_users,
        info.remote_users,
        info.frames_sent,
        info.frames_received
    )
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(command) = msg.content.strip_prefix(self.prefix.as_str()) else {
            return;
        };
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let command = command.trim().to_lowercase();
        info!(guild_id = %guild_id.get(), user_id = %msg.author.id.get(), command = %command, "Command received");

        let reply = self
            .run_command(&command, guild_id.get(), msg.author.id.get())
            .await;
        if let Err(e) = msg.channel_id.say(&ctx.http, reply).await {
            warn!(error = %e, "Failed to send command reply");
        }
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        let guild_id = guild.id.get();
        let mut states = self.voice_states.write();
        for (user_id, voice_state) in guild.voice_states.iter() {
            if let Some(channel_id) = voice_state.channel_id {
                states.insert((guild_id, user_id.get()), channel_id.get());
            }
        }
        info!(guild_id = %guild_id, tracked_users = %states.len(), "Voice states initialized");
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = %ready.guilds.len(), "Discord ready");
        self.bridge.registry().set_local_user(ready.user.id.get());
    }

    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id.map(|g| g.get()) else {
            return;
        };
        let user_id = new.user_id.get();
        let after = new.channel_id.map(|c| c.get());

        let tracked = {
            let mut states = self.voice_states.write();
            match after {
                Some(channel_id) => states.insert((guild_id, user_id), channel_id),
                None => states.remove(&(guild_id, user_id)),
            }
        };
        let before = tracked.or_else(|| old.and_then(|o| o.channel_id).map(|c| c.get()));

        if let Err(e) = self
            .bridge
            .update_presence(guild_id, user_id, before, after)
            .await
        {
            warn!(guild_id = %guild_id, user_id = %user_id, error = %e, "Failed to apply voice state update");
        }
    }
}

/// Periodically leave idle and abandoned sessions
async fn sweep_sessions(bridge: Arc<DiscordBridge>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let idle = bridge.cleanup_idle().await;
        let alone = bridge.cleanup_alone().await;
        if !idle.is_empty() || !alone.is_empty() {
            info!(idle = ?idle, alone = ?alone, "Session sweep");
        }
    }
}

/// Connect to Discord and bridge voice channels until shutdown
pub async fn start_discord(config: BridgeConfig) -> Result<()> {
    config.validate()?;

    let songbird = Songbird::serenity_from_config(
        songbird::Config::default().decode_mode(DecodeMode::Decode),
    );
    let (captured_tx, captured_rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
    let gateway = Arc::new(SongbirdGateway::new(songbird.clone(), captured_tx));
    let connector = WebSocketConnector::from_config(&config);
    let bridge = Arc::new(VoiceBridge::new(gateway, connector, config.clone()));

    tokio::spawn(forward_captured_audio(bridge.clone(), captured_rx));
    tokio::spawn(sweep_sessions(bridge.clone()));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(Handler::new(bridge.clone(), config.command_prefix.clone()))
        .register_songbird_with(songbird)
        .await
        .map_err(|e| BridgeError::gateway(format!("Failed to build Discord client: {}", e)))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutting down, leaving voice channels");
        bridge.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!(backend = %config.backend_url, "Starting Discord client");
    client
        .start()
        .await
        .map_err(|e| BridgeError::gateway(format!("Discord client error: {}", e)))
}
