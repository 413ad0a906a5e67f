//! Per-subject conversational memory.

use chrono::{DateTime, Utc};
use chatmux_core::message::{Message, Role};
use serde::{Deserialize, Serialize};

/// The two disjoint context key-spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// One context per user in a chat
    User,
    /// One context per channel post in a chat
    Post,
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Namespace::User => f.write_str("user"),
            Namespace::Post => f.write_str("post"),
        }
    }
}

/// Composite address of a context: chat, subject (user id or post message
/// id), and the bot that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    pub chat_id: i64,
    pub subject_id: i64,
    pub bot: String,
}

impl ContextKey {
    pub fn new(chat_id: i64, subject_id: i64, bot: impl Into<String>) -> Self {
        Self {
            chat_id,
            subject_id,
            bot: bot.into(),
        }
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.chat_id, self.subject_id, self.bot)
    }
}

/// Bounded history plus the metadata that drives prompting and eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Oldest-first
    pub history: Vec<Message>,

    pub last_interaction: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Turns ever appended; not reduced by truncation
    pub message_count: u64,

    /// Set once a direct exchange happens, never cleared
    pub is_active_conversation: bool,
}

impl ConversationContext {
    pub fn new(topic: Option<String>) -> Self {
        Self {
            history: Vec::new(),
            last_interaction: Utc::now(),
            topic,
            message_count: 0,
            is_active_conversation: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_interaction = Utc::now();
    }

    pub fn mark_active(&mut self) {
        self.is_active_conversation = true;
    }

    /// Append a turn, dropping the oldest entries beyond `max_history`.
    pub fn push(&mut self, role: Role, content: impl Into<String>, max_history: usize) {
        self.history.push(Message::new(role, content));
        if self.history.len() > max_history {
            let excess = self.history.len() - max_history;
            self.history.drain(..excess);
        }
        self.message_count += 1;
        self.touch();
    }

    /// The last `n` entries, oldest-first.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Whether this context has been idle for longer than its TTL.
    pub fn is_expired(
        &self,
        now: DateTime<Utc>,
        base_ttl: chrono::Duration,
        active_ttl: chrono::Duration,
    ) -> bool {
        let ttl = if self.is_active_conversation {
            active_ttl
        } else {
            base_ttl
        };
        now - self.last_interaction > ttl
    }
}
