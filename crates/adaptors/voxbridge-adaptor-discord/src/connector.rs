//! Backend connections, one per guild session

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use voxbridge_core::{BridgeConfig, BridgeError, ConnectionConfig, FrameSink, Result, VoiceFrame};
use voxbridge_provider_backend::{health_check, BackendClient};

/// An open backend conversation
pub struct BackendLink {
    /// Outbound frames
    pub sink: Arc<dyn FrameSink>,
    /// Inbound frames; closes when the backend is gone for good
    pub frames: mpsc::Receiver<VoiceFrame>,
}

impl std::fmt::Debug for BackendLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLink")
            .field("open", &self.sink.is_open())
            .finish()
    }
}

/// Opens backend conversations
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Open a conversation for `guild_id`
    async fn connect(&self, guild_id: u64) -> Result<BackendLink>;
}

/// Connects to the WebSocket backend with [`BackendClient`]
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    health_url: Option<String>,
    connection: ConnectionConfig,
}

impl WebSocketConnector {
    /// Create a connector for `url`
    pub fn new(url: impl Into<String>, connection: ConnectionConfig) -> Self {
        Self {
            url: url.into(),
            health_url: None,
            connection,
        }
    }

    /// Check this HTTP endpoint before every connect
    pub fn with_health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = Some(url.into());
        self
    }

    /// Build from bridge configuration
    pub fn from_config(config: &BridgeConfig) -> Self {
        let connector = Self::new(config.backend_url.clone(), config.connection.clone());
        match &config.backend_health_url {
            Some(url) => connector.with_health_url(url.clone()),
            None => connector,
        }
    }

    /// Backend WebSocket URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl BackendConnector for WebSocketConnector {
    async fn connect(&self, guild_id: u64) -> Result<BackendLink> {
        if let Some(health_url) = &self.health_url {
            if !health_check(health_url).await {
                warn!(guild_id = guild_id, url = %health_url, "Backend health check failed");
                return Err(BridgeError::network(format!(
                    "Backend is not healthy at {}",
                    health_url
                )));
            }
        }

        let (client, frames) = BackendClient::connect(&self.url, self.connection.clone()).await?;
        info!(guild_id = guild_id, url = %self.url, "Backend link open");
        Ok(BackendLink {
            sink: Arc::new(client),
            frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = BridgeConfig {
            backend_url: "ws://backend:9000/ws".to_string(),
            backend_health_url: Some("http://backend:9000/health".to_string()),
            ..Default::default()
        };
        let connector = WebSocketConnector::from_config(&config);
        assert_eq!(connector.url(), "ws://backend:9000/ws");
        assert_eq!(connector.health_url.as_deref(), Some("http://backend:9000/health"));
    }

    #[tokio::test]
    async fn test_unhealthy_backend_is_not_dialed() {
        let connector = WebSocketConnector::new("ws://127.0.0.1:1/ws", ConnectionConfig::default())
            .with_health_url("http://127.0.0.1:1/health");
        let err = connector.connect(1).await.unwrap_err();
        assert!(err.to_string().contains("not healthy"));
    }
}
