//! Subcommand implementations and the setup they share.

pub mod console;
pub mod doctor;
pub mod run;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chatmux_config::{AppConfig, BotConfig};
use chatmux_core::provider::Provider;
use chatmux_providers::OpenAiCompatProvider;

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

/// The config file that `load_config` reads.
pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::default_path)
}

/// Build the completion provider for one bot.
pub fn build_provider(
    config: &AppConfig,
    bot: &BotConfig,
) -> Result<Arc<dyn Provider>, Box<dyn std::error::Error>> {
    let api_key = config.api_key_for(bot).ok_or_else(|| {
        format!(
            "No API key for bot '{}': set api_key in config.toml, \
             or CHATMUX_API_KEY / OPENAI_API_KEY",
            bot.name
        )
    })?;

    let provider = OpenAiCompatProvider::new(
        "openai",
        &config.api_url,
        api_key,
        config.completion.timeout(),
    )?;
    Ok(Arc::new(provider))
}
