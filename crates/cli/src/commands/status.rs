//! `chatmux status` — Show configuration summary.

use std::path::Path;

use super::{config_path, load_config};

pub async fn run(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    let file = config_path(path);

    println!("chatmux status");
    println!("==============");
    println!("  Config file:  {}", file.display());
    println!("  API URL:      {}", config.api_url);
    println!("  Model:        {}", config.model);
    println!("  Temperature:  {}", config.temperature);
    println!("  Max tokens:   {}", config.max_tokens);
    println!(
        "  Context:      {} kept, {} per prompt, reinforce every {}",
        config.context.max_history,
        config.context.relevant_history_length,
        config.context.reinforcement_interval
    );
    println!(
        "  TTL:          {} min idle, {} min active, sweep every {} min",
        config.context.base_ttl_minutes,
        config.context.active_ttl_minutes,
        config.context.sweep_interval_minutes
    );
    println!(
        "  Retries:      {} (base {} ms, timeout {} ms)",
        config.completion.max_retries,
        config.completion.backoff_base_ms,
        config.completion.timeout_ms
    );

    println!("\n  Bots ({}):", config.bots.len());
    for bot in &config.bots {
        let key = if config.api_key_for(bot).is_some() { "key set" } else { "NO API KEY" };
        println!(
            "    - {:<16} model={} p(comment)={} [{key}]",
            bot.name,
            config.model_for(bot),
            bot.comment_probability
        );
    }

    if !file.exists() {
        println!("\n  ⚠️  No config file at {} — defaults shown", file.display());
    }

    Ok(())
}
