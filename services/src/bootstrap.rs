//! Process start-up shared by the binaries.

use anyhow::Context as _;
use service_spine_runtime::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "SPINE_CONFIG";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,service_spine=debug";

/// Install the global subscriber: `RUST_LOG` filter plus fmt output.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Read `.env`, then load the config named by the first argument or
/// `SPINE_CONFIG`, falling back to the environment alone.
///
/// # Errors
///
/// Fails if the config file cannot be loaded or validation fails.
pub fn load_config(mut args: impl Iterator<Item = String>) -> anyhow::Result<Config> {
    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            return Err(error).context("failed to read .env");
        }
    }

    let path = args
        .next()
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .filter(|path| !path.trim().is_empty());

    match path {
        Some(path) => Config::load(&path).with_context(|| format!("failed to load config from {path}")),
        None => Config::from_env().context("failed to load config from environment"),
    }
}
