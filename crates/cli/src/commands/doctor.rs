//! `chatmux doctor` — Diagnose configuration and connectivity.

use std::path::Path;

use chatmux_channels::{TelegramChannel, TelegramConfig};
use chatmux_core::channel::Channel;

use super::{build_provider, config_path, load_config};

pub async fn run(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 chatmux doctor");
    println!("=================\n");

    let mut issues = 0;

    let file = config_path(path);
    if !file.exists() {
        println!("  ❌ No config file at {}", file.display());
        println!("\n  ⚠️  1 issue(s) found. See above for details.");
        return Ok(());
    }

    let config = match load_config(path) {
        Ok(config) => {
            println!("  ✅ Config file valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    if config.bots.is_empty() {
        println!("  ❌ No bots configured");
        issues += 1;
    }

    for bot in &config.bots {
        println!("\n  {}", bot.name);

        match build_provider(&config, bot) {
            Ok(provider) => match provider.health_check().await {
                Ok(true) => println!("    ✅ Completion API reachable"),
                Ok(false) => {
                    println!("    ⚠️  Completion API rejected the key or is unavailable");
                    issues += 1;
                }
                Err(e) => {
                    println!("    ❌ Completion API unreachable: {e}");
                    issues += 1;
                }
            },
            Err(e) => {
                println!("    ❌ {e}");
                issues += 1;
            }
        }

        let channel = match TelegramChannel::new(TelegramConfig::new(&bot.telegram_token)) {
            Ok(channel) => channel,
            Err(e) => {
                println!("    ❌ {e}");
                issues += 1;
                continue;
            }
        };
        match channel.connect().await {
            Ok(identity) => println!("    ✅ Telegram: @{} (id {})", identity.username, identity.id),
            Err(e) => {
                println!("    ❌ Telegram: {e}");
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
