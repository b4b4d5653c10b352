//! Discord voice bridge
//!
//! Usage:
//! ```bash
//! DISCORD_BOT_TOKEN=... voxbridge --backend-url ws://127.0.0.1:8765/ws
//! voxbridge --services services.json
//! VOXBRIDGE_ENV_FILE=/etc/voxbridge.env voxbridge
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use voxbridge_core::{init_logging, load_env, load_env_from_path, BridgeConfig};
use voxbridge_adaptor_discord::start_discord;
use voxbridge_provider_backend::health_check;

#[derive(Parser, Debug)]
#[command(name = "voxbridge")]
#[command(about = "Bridge Discord voice channels to a local speech/LLM backend")]
struct Args {
    /// services.json with backend and capture settings
    #[arg(long, env = "VOXBRIDGE_SERVICES")]
    services: Option<PathBuf>,

    /// Backend WebSocket URL (overrides environment and services.json)
    #[arg(long)]
    backend_url: Option<String>,

    /// Command prefix (overrides BOT_COMMAND_PREFIX)
    #[arg(long)]
    prefix: Option<String>,

    /// Join and speak but do not forward captured audio
    #[arg(long)]
    no_listen: bool,
}

/// Names an env file to load instead of searching for `.env`
const ENV_FILE_VAR: &str = "VOXBRIDGE_ENV_FILE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loaded before parsing so clap's `env` fallbacks see the file
    match std::env::var_os(ENV_FILE_VAR) {
        Some(path) => load_env_from_path(PathBuf::from(path))?,
        None => load_env()?,
    }
    init_logging("info");

    let args = Args::parse();

    let mut config = BridgeConfig::from_env();
    if let Some(path) = &args.services {
        config = config.with_services_file(path)?;
        info!(path = %path.display(), "Loaded services configuration");
    }
    if let Some(url) = args.backend_url {
        config.backend_url = url;
    }
    if let Some(prefix) = args.prefix {
        config.command_prefix = prefix;
    }
    if args.no_listen {
        config.listen_enabled = false;
    }
    config.validate()?;

    if let Some(url) = &config.backend_health_url {
        if health_check(url).await {
            info!(url = %url, "Backend is healthy");
        } else {
            warn!(url = %url, "Backend health check failed; sessions will retry on join");
        }
    }

    start_discord(config).await?;
    Ok(())
}
