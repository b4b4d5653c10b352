//! Configuration management and environment variable loading

use crate::frames::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};
use crate::resilience::RetryConfig;
use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Load environment variables from .env file
///
/// Looks in the current directory and its parents. A missing file is not an
/// error; a file that fails to parse is.
///
/// # Example
///
/// ```no_run
/// use voxbridge_core::load_env;
///
/// load_env().ok();
/// let token = std::env::var("DISCORD_BOT_TOKEN").unwrap_or_default();
/// ```
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!("Loaded environment from: {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::LineParse(line, pos)) => Err(BridgeError::config(format!(
            "Failed to parse .env file at line {}, position {}",
            line, pos
        ))),
        Err(dotenvy::Error::Io(_)) => {
            tracing::warn!("No .env file found - using system environment variables only");
            Ok(())
        }
        Err(e) => Err(BridgeError::config(format!("Failed to load .env file: {}", e))),
    }
}

/// Load environment variables from a specific file
pub fn load_env_from_path<P: AsRef<Path>>(path: P) -> Result<()> {
    match dotenvy::from_path(path.as_ref()) {
        Ok(_) => {
            tracing::info!("Loaded environment from: {}", path.as_ref().display());
            Ok(())
        }
        Err(e) => Err(BridgeError::config(format!(
            "Failed to load {} environment file: {}",
            path.as_ref().display(),
            e
        ))),
    }
}

/// Get optional environment variable with default
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get environment variable as boolean
pub fn get_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

/// Get environment variable as integer
pub fn get_env_int<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Audio capture settings announced to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioCaptureConfig {
    /// Sample rate sent to the backend (Hz)
    pub sample_rate: u32,
    /// Channel count sent to the backend
    pub channels: u16,
    /// Duration of each `audio_input` frame (ms)
    pub chunk_ms: u64,
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            chunk_ms: 100,
        }
    }
}

/// Backend connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Timeout for each connection attempt (seconds)
    pub connect_timeout_secs: u64,
    /// Attempts made before giving up on the first connection
    pub initial_attempts: usize,
    /// Pause between initial attempts
    pub attempt_pause: Duration,
    /// Backoff used to re-establish a dropped connection
    pub reconnect: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            initial_attempts: 3,
            attempt_pause: Duration::from_secs(2),
            reconnect: RetryConfig::reconnect(),
        }
    }
}

impl ConnectionConfig {
    /// Per-attempt connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Discord bot token
    pub discord_token: String,
    /// Prefix for text commands
    pub command_prefix: String,
    /// Backend WebSocket URL
    pub backend_url: String,
    /// Backend HTTP health endpoint, checked before connecting
    pub backend_health_url: Option<String>,
    /// Audio capture settings
    pub audio: AudioCaptureConfig,
    /// Backend connection settings
    pub connection: ConnectionConfig,
    /// Leave a voice channel after this many seconds without activity
    pub voice_timeout_secs: u64,
    /// Leave when everyone else has left the channel
    pub leave_when_alone: bool,
    /// Forward captured audio to the backend
    pub listen_enabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),
            backend_url: "ws://127.0.0.1:8765/ws".to_string(),
            backend_health_url: None,
            audio: AudioCaptureConfig::default(),
            connection: ConnectionConfig::default(),
            voice_timeout_secs: 300,
            leave_when_alone: true,
            listen_enabled: true,
        }
    }
}

impl BridgeConfig {
    /// Build from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            discord_token: get_env_or("DISCORD_BOT_TOKEN", ""),
            command_prefix: get_env_or("BOT_COMMAND_PREFIX", &defaults.command_prefix),
            backend_url: get_env_or("BACKEND_WS_URL", &defaults.backend_url),
            backend_health_url: env::var("BACKEND_HEALTH_URL").ok().filter(|v| !v.is_empty()),
            voice_timeout_secs: get_env_int("VOICE_TIMEOUT", defaults.voice_timeout_secs),
            leave_when_alone: get_env_bool("LEAVE_WHEN_ALONE", defaults.leave_when_alone),
            listen_enabled: get_env_bool("LISTEN_ENABLED", defaults.listen_enabled),
            ..defaults
        }
    }

    /// Overlay values from a `services.json` document
    ///
    /// Recognized keys: `websocket_service.url`,
    /// `websocket_service.startup_timeout`, `websocket_service.health_url`,
    /// `discord_bot.audio_capture.{sample_rate,channels,chunk_ms}` and
    /// `discord_bot.connection.{max_retries,retry_delay,max_retry_delay,initial_attempts}`.
    pub fn with_services_json(mut self, services: &Value) -> Result<Self> {
        let ws = &services["websocket_service"];
        if let Some(url) = ws["url"].as_str() {
            self.backend_url = url.to_string();
        }
        if let Some(url) = ws["health_url"].as_str() {
            self.backend_health_url = Some(url.to_string());
        }
        if let Some(timeout) = read_u64(ws, "startup_timeout")? {
            self.connection.connect_timeout_secs = timeout;
        }

        let capture = &services["discord_bot"]["audio_capture"];
        if let Some(rate) = read_u64(capture, "sample_rate")? {
            self.audio.sample_rate = u32::try_from(rate)
                .map_err(|_| BridgeError::config(format!("sample_rate out of range: {}", rate)))?;
        }
        if let Some(channels) = read_u64(capture, "channels")? {
            self.audio.channels = u16::try_from(channels)
                .map_err(|_| BridgeError::config(format!("channels out of range: {}", channels)))?;
        }
        if let Some(chunk) = read_u64(capture, "chunk_ms")? {
            self.audio.chunk_ms = chunk;
        }

        let connection = &services["discord_bot"]["connection"];
        if let Some(retries) = read_u64(connection, "max_retries")? {
            self.connection.reconnect.max_retries = retries as usize;
        }
        if let Some(attempts) = read_u64(connection, "initial_attempts")? {
            self.connection.initial_attempts = attempts as usize;
        }
        if let Some(delay) = connection["retry_delay"].as_f64() {
            self.connection.reconnect.initial_delay = secs_f64(delay, "retry_delay")?;
        }
        if let Some(delay) = connection["max_retry_delay"].as_f64() {
            self.connection.reconnect.max_delay = secs_f64(delay, "max_retry_delay")?;
        }

        Ok(self)
    }

    /// Read and overlay a `services.json` file
    pub fn with_services_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let services: Value = serde_json::from_str(&text)?;
        self.with_services_json(&services)
    }

    /// Check every field and report all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.discord_token.trim().is_empty() {
            problems.push("DISCORD_BOT_TOKEN is not set".to_string());
        }
        if self.command_prefix.is_empty() {
            problems.push("command prefix is empty".to_string());
        }
        if !(self.backend_url.starts_with("ws://") || self.backend_url.starts_with("wss://")) {
            problems.push(format!("backend URL must be ws:// or wss://: '{}'", self.backend_url));
        }
        if let Some(url) = &self.backend_health_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                problems.push(format!("health URL must be http:// or https://: '{}'", url));
            }
        }
        if !crate::audio::is_capture_format_supported(self.audio.sample_rate, self.audio.channels) {
            problems.push(format!(
                "unsupported capture format {} Hz x {} channels (rate must divide 48000, channels 1 or 2)",
                self.audio.sample_rate, self.audio.channels
            ));
        }
        if self.audio.chunk_ms == 0 {
            problems.push("audio chunk duration must be positive".to_string());
        }
        if self.connection.initial_attempts == 0 {
            problems.push("at least one connection attempt is required".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::config(format!(
                "Invalid configuration: {}",
                problems.join("; ")
            )))
        }
    }

    /// Voice inactivity timeout
    pub fn voice_timeout(&self) -> Duration {
        Duration::from_secs(self.voice_timeout_secs)
    }
}

fn read_u64(section: &Value, key: &str) -> Result<Option<u64>> {
    match &section[key] {
        Value::Null => Ok(None),
        value => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| BridgeError::config(format!("{} must be a non-negative integer, got {}", key, value))),
    }
}

fn secs_f64(secs: f64, key: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| BridgeError::config(format!("{} must be a non-negative number of seconds", key)))
}
