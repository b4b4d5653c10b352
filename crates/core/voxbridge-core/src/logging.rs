//! Logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable consulted when `RUST_LOG` is unset
pub const LOG_LEVEL_ENV: &str = "VOXBRIDGE_LOG_LEVEL";

/// Initialize the global logging system
///
/// Filter precedence: `RUST_LOG`, then `VOXBRIDGE_LOG_LEVEL`, then
/// `default_level`. Returns `false` if a subscriber was already installed.
pub fn init_logging(default_level: &str) -> bool {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let level = std::env::var(LOG_LEVEL_ENV).ok();
    let env_filter = build_filter(rust_log.as_deref(), level.as_deref(), default_level);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init()
        .is_ok()
}

/// First non-empty, parseable directive set wins
fn build_filter(rust_log: Option<&str>, level: Option<&str>, default_level: &str) -> EnvFilter {
    [rust_log, level]
        .into_iter()
        .flatten()
        .filter(|directives| !directives.trim().is_empty())
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level))
}
