//! `chatmux console` — Talk to one bot persona from the terminal.

use std::path::Path;
use std::sync::Arc;

use chatmux_agent::BotInstance;
use chatmux_channels::ConsoleChannel;

use super::{build_provider, load_config};

pub async fn run(
    config_path: Option<&Path>,
    bot_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let bot = config
        .bot(bot_name)
        .ok_or_else(|| format!("Unknown bot '{bot_name}'"))?;
    let provider = build_provider(&config, bot)?;

    println!("chatmux console — talking to {} ({})", bot.name, config.model_for(bot));
    println!("Type a message and press Enter. 'exit' or Ctrl+D to quit.\n");

    let channel = Arc::new(ConsoleChannel::new(&bot.name));
    BotInstance::new(bot.clone(), &config, channel, provider)
        .run()
        .await?;

    Ok(())
}
