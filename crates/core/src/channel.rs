//! Channel trait — the abstraction over messaging platforms.
//!
//! A Channel connects one bot account to a messaging platform. It
//! authenticates, yields decoded [`InboundEvent`]s, and sends text back.
//! Chunking and pacing of long replies are handled above it, by the outbox.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::event::InboundEvent;

/// Who the bot is on the platform, as reported at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    /// Platform user id of the bot account
    pub id: i64,
    /// Handle without the leading `@`
    pub username: String,
}

/// The core Channel trait.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "telegram", "console").
    fn name(&self) -> &str;

    /// Authenticate and report the bot's own identity.
    ///
    /// Failure here is fatal for the bot instance.
    async fn connect(&self) -> Result<BotIdentity, ChannelError>;

    /// Start listening for incoming events.
    ///
    /// Returns a receiver that yields decoded events. Polling runs on a
    /// task owned by the channel.
    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError>;

    /// Send one message (already sized for the platform) to a chat.
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError>;

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _chat_id: i64) -> Result<(), ChannelError> {
        Ok(()) // No-op default
    }

    /// Stop the channel gracefully.
    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
