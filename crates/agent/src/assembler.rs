//! Prompt assembly — turning a context into the message list sent to the
//! completion API.
//!
//! Layers, in order:
//!
//! 1. **System** — the bot's static behavioral prompt, always present
//! 2. **Reinforcement** — role reminder on every Nth recorded turn
//! 3. **Topic** — the current discussion topic, when known
//! 4. **History** — the most recent turns, oldest-first
//!
//! Assembly only reads the context and is deterministic.

use chatmux_config::{ContextConfig, POST_TEXT_PLACEHOLDER};
use chatmux_core::message::Message;
use chatmux_memory::ConversationContext;

/// Builds prompts for one bot persona.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    bot_name: String,
    relevant_history_length: usize,
    reinforcement_interval: u64,
}

impl PromptAssembler {
    pub fn new(
        bot_name: impl Into<String>,
        relevant_history_length: usize,
        reinforcement_interval: u64,
    ) -> Self {
        Self {
            bot_name: bot_name.into(),
            relevant_history_length,
            reinforcement_interval,
        }
    }

    pub fn from_config(bot_name: impl Into<String>, config: &ContextConfig) -> Self {
        Self::new(
            bot_name,
            config.relevant_history_length,
            config.reinforcement_interval,
        )
    }

    /// Whether a prompt built at this turn count carries the role reminder.
    pub fn needs_reinforcement(&self, message_count: u64) -> bool {
        self.reinforcement_interval > 0
            && message_count > 0
            && message_count % self.reinforcement_interval == 0
    }

    /// Conversation prompt for a user or post context.
    pub fn build(&self, context: &ConversationContext, system_prompt: &str) -> Vec<Message> {
        let window = context.recent(self.relevant_history_length);
        let mut messages = Vec::with_capacity(window.len() + 3);

        messages.push(Message::system(system_prompt));

        if self.needs_reinforcement(context.message_count) {
            messages.push(Message::system(format!(
                "Reminder: you are {}. Stay in character and keep following the role and \
                 style described in your instructions.",
                self.bot_name
            )));
        }

        if let Some(topic) = context.topic.as_deref().filter(|t| !t.is_empty()) {
            messages.push(Message::system(format!(
                "The current discussion topic is: {topic}."
            )));
        }

        messages.extend(window.iter().cloned());
        messages
    }

    /// Single-shot prompt asking for a comment on a channel post.
    pub fn build_post_comment(
        &self,
        system_prompt: &str,
        template: &str,
        post_text: &str,
    ) -> Vec<Message> {
        vec![
            Message::system(system_prompt),
            Message::user(template.replace(POST_TEXT_PLACEHOLDER, post_text)),
        ]
    }
}
