//! Configuration loading, validation, and management for chatmux.
//!
//! Loads configuration from `~/.chatmux/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder the post-comment template must contain.
pub const POST_TEXT_PLACEHOLDER: &str = "{postText}";

/// Upper bound for every minute-valued setting (one year).
pub const MAX_MINUTES: u64 = 365 * 24 * 60;

/// The root configuration structure.
///
/// Maps directly to `config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the OpenAI-compatible completion API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Shared API key, used by bots that don't set their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model
    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Conversation memory settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Completion retry settings
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Outbound message settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// One entry per bot account
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.7
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("context", &self.context)
            .field("completion", &self.completion)
            .field("delivery", &self.delivery)
            .field("bots", &self.bots)
            .finish()
    }
}

/// A single bot account and its persona.
#[derive(Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Display name, also used in logs
    pub name: String,

    /// Bot API token from @BotFather
    pub telegram_token: String,

    /// Completion API key (falls back to the shared key)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Static behavioral prompt
    pub system_prompt: String,

    /// Template for channel-post comments; must contain `{postText}`
    pub post_comment_prompt: String,

    /// Probability (0.0–1.0) of commenting on a channel post
    #[serde(default = "default_comment_probability")]
    pub comment_probability: f64,

    /// Drop addressed messages older than this many minutes instead of
    /// everything sent before startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_older_than_minutes: Option<u64>,

    /// Per-bot model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_comment_probability() -> f64 {
    1.0
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("name", &self.name)
            .field("telegram_token", &"[REDACTED]")
            .field("api_key", &redact(&self.api_key))
            .field("comment_probability", &self.comment_probability)
            .field("ignore_older_than_minutes", &self.ignore_older_than_minutes)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Entries kept per context
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Entries sent with each prompt
    #[serde(default = "default_relevant_history_length")]
    pub relevant_history_length: usize,

    /// Re-inject role instructions when the turn counter hits a multiple of this
    #[serde(default = "default_reinforcement_interval")]
    pub reinforcement_interval: u64,

    /// TTL for contexts without a direct exchange
    #[serde(default = "default_base_ttl_minutes")]
    pub base_ttl_minutes: u64,

    /// TTL for contexts with an ongoing conversation
    #[serde(default = "default_active_ttl_minutes")]
    pub active_ttl_minutes: u64,

    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

fn default_max_history() -> usize {
    30
}
fn default_relevant_history_length() -> usize {
    10
}
fn default_reinforcement_interval() -> u64 {
    10
}
fn default_base_ttl_minutes() -> u64 {
    30
}
fn default_active_ttl_minutes() -> u64 {
    120
}
fn default_sweep_interval_minutes() -> u64 {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            relevant_history_length: default_relevant_history_length(),
            reinforcement_interval: default_reinforcement_interval(),
            base_ttl_minutes: default_base_ttl_minutes(),
            active_ttl_minutes: default_active_ttl_minutes(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
        }
    }
}

impl ContextConfig {
    pub fn base_ttl(&self) -> Duration {
        minutes(self.base_ttl_minutes)
    }

    pub fn active_ttl(&self) -> Duration {
        minutes(self.active_ttl_minutes)
    }

    pub fn sweep_interval(&self) -> Duration {
        minutes(self.sweep_interval_minutes)
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Retries after the first attempt, for transport failures only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on each retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Per-attempt request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl CompletionConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Longest single message the platform accepts (in characters)
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Pause between parts of a split reply
    #[serde(default = "default_part_delay_ms")]
    pub part_delay_ms: u64,
}

fn default_max_message_length() -> usize {
    4096
}
fn default_part_delay_ms() -> u64 {
    500
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            part_delay_ms: default_part_delay_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn part_delay(&self) -> Duration {
        Duration::from_millis(self.part_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    ///
    /// `CHATMUX_CONFIG` overrides the path. Environment variables also fill
    /// in the shared API key and model:
    /// - `CHATMUX_API_KEY` (highest priority)
    /// - `OPENAI_API_KEY`
    /// - `CHATMUX_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CHATMUX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        Self::load_with_env(&path)
    }

    /// Load from an explicit path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("CHATMUX_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CHATMUX_MODEL") {
            config.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatmux")
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let ctx = &self.context;
        if ctx.max_history == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_history must be > 0".into(),
            ));
        }
        if ctx.relevant_history_length > ctx.max_history {
            return Err(ConfigError::ValidationError(format!(
                "context.relevant_history_length ({}) exceeds context.max_history ({})",
                ctx.relevant_history_length, ctx.max_history
            )));
        }
        if ctx.reinforcement_interval == 0 || ctx.sweep_interval_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "context intervals must be > 0".into(),
            ));
        }
        if ctx.base_ttl_minutes == 0 || ctx.active_ttl_minutes < ctx.base_ttl_minutes {
            return Err(ConfigError::ValidationError(
                "context TTLs must satisfy 0 < base_ttl_minutes <= active_ttl_minutes".into(),
            ));
        }
        if ctx.active_ttl_minutes > MAX_MINUTES || ctx.sweep_interval_minutes > MAX_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "context TTLs and sweep interval must not exceed {MAX_MINUTES} minutes"
            )));
        }

        if self.delivery.max_message_length < 64 {
            return Err(ConfigError::ValidationError(
                "delivery.max_message_length must be at least 64".into(),
            ));
        }

        let mut seen = HashSet::new();
        for bot in &self.bots {
            if !seen.insert(bot.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate bot name '{}'",
                    bot.name
                )));
            }
            bot.validate()?;
        }

        Ok(())
    }

    /// Find a bot by name.
    pub fn bot(&self, name: &str) -> Option<&BotConfig> {
        self.bots.iter().find(|b| b.name == name)
    }

    /// The API key a bot should use: its own, else the shared one.
    pub fn api_key_for<'a>(&'a self, bot: &'a BotConfig) -> Option<&'a str> {
        bot.api_key.as_deref().or(self.api_key.as_deref())
    }

    /// The model a bot should use: its override, else the default.
    pub fn model_for<'a>(&'a self, bot: &'a BotConfig) -> &'a str {
        bot.model.as_deref().unwrap_or(&self.model)
    }
}

impl BotConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            ConfigError::ValidationError(format!("bot '{}': {reason}", self.name))
        };

        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError("bot name must not be empty".into()));
        }
        if self.telegram_token.trim().is_empty() {
            return Err(invalid("telegram_token must not be empty"));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(invalid("system_prompt must not be empty"));
        }
        if !self.post_comment_prompt.contains(POST_TEXT_PLACEHOLDER) {
            return Err(invalid("post_comment_prompt must contain {postText}"));
        }
        if !(0.0..=1.0).contains(&self.comment_probability) {
            return Err(invalid("comment_probability must be between 0.0 and 1.0"));
        }
        if self.ignore_older_than_minutes.is_some_and(|m| m > MAX_MINUTES) {
            return Err(invalid(&format!(
                "ignore_older_than_minutes must not exceed {MAX_MINUTES}"
            )));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            context: ContextConfig::default(),
            completion: CompletionConfig::default(),
            delivery: DeliveryConfig::default(),
            bots: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
