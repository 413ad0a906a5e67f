//! Dispatch policy — deciding whether and how a bot reacts to an event.
//!
//! Every inbound event is classified once:
//!
//! - **ChannelPost**: a post relayed from a channel; the bot may comment
//! - **Direct**: a reply to the bot, or a message mentioning its handle
//! - **Stale**: addressed to the bot, but older than the cutoff
//! - **Ignored**: everything else, including the bot's own messages
//!
//! [`Dispatcher::handle`] never returns an error. Failures are logged with
//! the bot name; for direct messages the user also gets a short notice.

use std::sync::Arc;

use chatmux_channels::Outbox;
use chatmux_config::{BotConfig, MAX_MINUTES};
use chatmux_core::channel::BotIdentity;
use chatmux_core::error::{Error, ProviderError};
use chatmux_core::event::{InboundEvent, mention_spans};
use chatmux_core::message::Role;
use chatmux_memory::{ContextKey, ContextStore, Namespace};
use chatmux_providers::CompletionGateway;
use chrono::{DateTime, Utc};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::assembler::PromptAssembler;
use crate::topic::TopicInference;

/// Sent instead of a reply that came back empty or near-empty.
pub const FALLBACK_REPLY: &str =
    "Hmm, I'm not sure what to say to that. Could you put it another way?";

const OVERLOADED_NOTICE: &str =
    "I'm a bit overloaded right now. Please try again in a little while.";
const TIMEOUT_NOTICE: &str =
    "That took me too long to answer. Could you try a shorter or simpler request?";
const APOLOGY_NOTICE: &str =
    "Sorry, something went wrong while I was preparing my reply. Please try again later.";

/// How the dispatch policy sees an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    ChannelPost,
    Direct,
    Stale,
    Ignored,
}

/// Where "too old to answer" begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// Everything sent before this instant (normally process start)
    Since(DateTime<Utc>),
    /// Everything older than this, relative to when it is handled
    MaxAge(chrono::Duration),
}

impl Cutoff {
    pub fn for_bot(bot: &BotConfig, started_at: DateTime<Utc>) -> Self {
        match bot.ignore_older_than_minutes {
            Some(minutes) => {
                let minutes = minutes.min(MAX_MINUTES);
                Self::MaxAge(chrono::Duration::minutes(minutes as i64))
            }
            None => Self::Since(started_at),
        }
    }

    pub fn at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Since(instant) => *instant,
            Self::MaxAge(age) => now
                .checked_sub_signed(*age)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// Classify an event for the bot with the given identity.
pub fn classify(event: &InboundEvent, identity: &BotIdentity, cutoff: DateTime<Utc>) -> EventClass {
    if event.sender_id() == Some(identity.id) {
        return EventClass::Ignored;
    }
    if event.text.trim().is_empty() {
        return EventClass::Ignored;
    }
    if event.is_channel_post() {
        return EventClass::ChannelPost;
    }

    let replies_to_bot = event
        .reply_to
        .as_ref()
        .is_some_and(|target| target.is_from(identity.id));
    if !replies_to_bot && !event.mentions(&identity.username) {
        return EventClass::Ignored;
    }

    if event.timestamp < cutoff {
        EventClass::Stale
    } else {
        EventClass::Direct
    }
}

/// Remove every `@handle` mention (case-insensitive) and trim the rest.
pub fn strip_handle(text: &str, handle: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for span in mention_spans(text, handle) {
        out.push_str(&text[last..span.start]);
        last = span.end;
    }
    out.push_str(&text[last..]);
    out.trim().to_string()
}

/// Trim a model reply, replacing one that is too short to be useful.
pub fn sanitize_reply(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() < 2 {
        FALLBACK_REPLY.to_string()
    } else {
        trimmed.to_string()
    }
}

/// The notice a user gets when no reply could be produced.
pub fn degradation_notice(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::RateLimited { .. } => OVERLOADED_NOTICE,
        ProviderError::Timeout(_) => TIMEOUT_NOTICE,
        _ => APOLOGY_NOTICE,
    }
}

/// Reacts to events on behalf of one bot.
pub struct Dispatcher {
    bot: BotConfig,
    identity: BotIdentity,
    cutoff: Cutoff,
    store: Arc<ContextStore>,
    gateway: Arc<CompletionGateway>,
    topics: TopicInference,
    assembler: PromptAssembler,
    outbox: Outbox,
}

impl Dispatcher {
    pub fn new(
        bot: BotConfig,
        identity: BotIdentity,
        cutoff: Cutoff,
        store: Arc<ContextStore>,
        gateway: Arc<CompletionGateway>,
        assembler: PromptAssembler,
        outbox: Outbox,
    ) -> Self {
        Self {
            topics: TopicInference::new(Arc::clone(&gateway)),
            bot,
            identity,
            cutoff,
            store,
            gateway,
            assembler,
            outbox,
        }
    }

    /// Classify and handle one event. Never fails.
    pub async fn handle(&self, event: InboundEvent) -> EventClass {
        let span = info_span!(
            "event",
            bot = %self.bot.name,
            event_id = %Uuid::new_v4(),
            chat_id = event.chat.id,
            message_id = event.message_id,
        );

        async {
            let class = classify(&event, &self.identity, self.cutoff.at(Utc::now()));
            let result = match class {
                EventClass::ChannelPost => self.on_channel_post(&event).await,
                EventClass::Direct => self.on_direct(&event).await,
                EventClass::Stale => {
                    info!(sent_at = %event.timestamp, "Dropping stale message");
                    Ok(())
                }
                EventClass::Ignored => Ok(()),
            };
            if let Err(e) = result {
                error!(bot = %self.bot.name, kind = ?class, error = %e, "Event handling failed");
            }
            class
        }
        .instrument(span)
        .await
    }

    async fn on_channel_post(&self, event: &InboundEvent) -> Result<(), Error> {
        let probability = self.bot.comment_probability;
        if probability < 1.0 && rand::random::<f64>() >= probability {
            debug!(probability, "Skipping channel post");
            return Ok(());
        }

        let topic = self.topics.infer(&event.text).await;
        let key = ContextKey::new(event.chat.id, event.message_id, &self.bot.name);
        self.store
            .with_context(Namespace::Post, &key, Some(&topic), |_| ())
            .await;

        let prompt = self.assembler.build_post_comment(
            &self.bot.system_prompt,
            &self.bot.post_comment_prompt,
            &event.text,
        );
        let comment = self.gateway.complete(prompt).await?;
        let comment = comment.trim();
        if comment.is_empty() {
            warn!("Empty comment from model, not posting");
            return Ok(());
        }

        let max_history = self.store.policy().max_history;
        self.store
            .with_context(Namespace::Post, &key, None, |ctx| {
                ctx.push(Role::User, event.text.as_str(), max_history);
                ctx.push(Role::Assistant, comment, max_history);
            })
            .await;

        self.outbox
            .deliver(event.chat.id, comment, Some(event.message_id))
            .await?;
        info!(topic = %topic, "Commented on channel post");
        Ok(())
    }

    async fn on_direct(&self, event: &InboundEvent) -> Result<(), Error> {
        let text = strip_handle(&event.text, &self.identity.username);
        if text.is_empty() {
            debug!("Mention without text, ignoring");
            return Ok(());
        }

        let chat_id = event.chat.id;
        let mut topic = None;

        if let Some(post) = event.reply_to.as_ref().filter(|r| r.is_channel_post()) {
            if let Some(post_text) = post.text.as_deref().filter(|t| !t.trim().is_empty()) {
                let inferred = self.topics.infer(post_text).await;
                let post_key = ContextKey::new(chat_id, post.message_id, &self.bot.name);
                self.store
                    .with_context(Namespace::Post, &post_key, Some(&inferred), |_| ())
                    .await;
                topic = Some(inferred);
            }
        }

        let subject = event.sender_id().unwrap_or(chat_id);
        let key = ContextKey::new(chat_id, subject, &self.bot.name);
        let max_history = self.store.policy().max_history;

        let prompt = self
            .store
            .with_context(Namespace::User, &key, topic.as_deref(), |ctx| {
                ctx.mark_active();
                ctx.push(Role::User, text.as_str(), max_history);
                self.assembler.build(ctx, &self.bot.system_prompt)
            })
            .await;

        if let Err(e) = self.outbox.channel().send_typing(chat_id).await {
            debug!(error = %e, "Typing indicator failed");
        }

        let reply = match self.gateway.complete(prompt).await {
            Ok(raw) => sanitize_reply(&raw),
            Err(e) => {
                error!(bot = %self.bot.name, error = %e, "Completion failed");
                self.outbox
                    .deliver(chat_id, degradation_notice(&e), Some(event.message_id))
                    .await?;
                return Ok(());
            }
        };

        self.store
            .with_context(Namespace::User, &key, None, |ctx| {
                ctx.push(Role::Assistant, reply.as_str(), max_history);
            })
            .await;

        let parts = self
            .outbox
            .deliver(chat_id, &reply, Some(event.message_id))
            .await?;
        debug!(parts, "Reply delivered");
        Ok(())
    }
}
