//! chatmux CLI — the main entry point.
//!
//! Commands:
//! - `run`     — Start all (or selected) bots
//! - `console` — Talk to one bot persona from the terminal
//! - `status`  — Show configuration summary
//! - `doctor`  — Diagnose configuration and connectivity

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatmux",
    about = "chatmux — run several LLM-backed Telegram bot personas from one process",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config.toml (defaults to ~/.chatmux/config.toml)
    #[arg(short, long, global = true, env = "CHATMUX_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bots and process messages until Ctrl-C
    Run {
        /// Only start the named bot (repeatable)
        #[arg(short, long = "bot")]
        bots: Vec<String>,
    },

    /// Chat with one bot persona from the terminal
    Console {
        /// Name of the bot to talk to
        #[arg(short, long)]
        bot: String,
    },

    /// Show configuration summary
    Status,

    /// Diagnose configuration and connectivity
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run { bots } => commands::run::run(config_path, &bots).await?,
        Commands::Console { bot } => commands::console::run(config_path, &bot).await?,
        Commands::Status => commands::status::run(config_path).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}
