//! `chatmux run` — Start the bots.

use std::path::Path;
use std::sync::Arc;

use chatmux_agent::BotInstance;
use chatmux_channels::{TelegramChannel, TelegramConfig};
use chatmux_config::BotConfig;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::{build_provider, load_config};

pub async fn run(
    config_path: Option<&Path>,
    only: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;

    if config.bots.is_empty() {
        return Err("No bots configured. Add a [[bots]] entry to config.toml.".into());
    }
    if let Some(unknown) = only.iter().find(|name| config.bot(name).is_none()) {
        return Err(format!("Unknown bot '{unknown}'").into());
    }

    let selected: Vec<&BotConfig> = config
        .bots
        .iter()
        .filter(|bot| only.is_empty() || only.contains(&bot.name))
        .collect();
    let total = selected.len();
    let mut failed = 0usize;

    println!("chatmux — starting {total} bot(s)");

    let mut bots = JoinSet::new();
    for bot in selected {
        let provider = match build_provider(&config, bot) {
            Ok(provider) => provider,
            Err(e) => {
                error!(bot = %bot.name, error = %e, "Bot not started");
                failed += 1;
                continue;
            }
        };
        let channel = match TelegramChannel::new(TelegramConfig::new(&bot.telegram_token)) {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                error!(bot = %bot.name, error = %e, "Bot not started");
                failed += 1;
                continue;
            }
        };

        let instance = BotInstance::new(bot.clone(), &config, channel, provider);
        let name = bot.name.clone();
        bots.spawn(async move { (name, instance.run().await) });
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                bots.abort_all();
                return Ok(());
            }
            done = bots.join_next() => match done {
                Some(Ok((name, Ok(())))) => warn!(bot = %name, "Bot stopped"),
                Some(Ok((name, Err(e)))) => {
                    error!(bot = %name, error = %e, "Bot failed");
                    failed += 1;
                }
                Some(Err(e)) => {
                    error!(error = %e, "Bot task ended abnormally");
                    failed += 1;
                }
                None => break,
            }
        }
    }

    if failed == total {
        return Err("All bots failed to start. See the log for details.".into());
    }
    Ok(())
}
