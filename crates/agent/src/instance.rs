//! Bot instance — one bot account, its memory, and its event loop.
//!
//! Instances share nothing: each owns its context store, completion
//! gateway, and channel, so one failing bot never stalls another.

use std::sync::Arc;
use std::time::Duration;

use chatmux_channels::Outbox;
use chatmux_config::{AppConfig, BotConfig, ContextConfig, DeliveryConfig};
use chatmux_core::channel::Channel;
use chatmux_core::error::{ChannelError, Error};
use chatmux_core::event::InboundEvent;
use chatmux_core::provider::Provider;
use chatmux_memory::{ContextStore, StorePolicy};
use chatmux_providers::CompletionGateway;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::assembler::PromptAssembler;
use crate::dispatch::{Cutoff, Dispatcher};

/// A configured but not yet connected bot.
pub struct BotInstance {
    bot: BotConfig,
    context: ContextConfig,
    delivery: DeliveryConfig,
    channel: Arc<dyn Channel>,
    gateway: Arc<CompletionGateway>,
    store: Arc<ContextStore>,
    started_at: DateTime<Utc>,
}

impl BotInstance {
    pub fn new(
        bot: BotConfig,
        config: &AppConfig,
        channel: Arc<dyn Channel>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        let gateway = CompletionGateway::from_config(provider, config, config.model_for(&bot));
        let store = ContextStore::new(StorePolicy {
            max_history: config.context.max_history,
            base_ttl: config.context.base_ttl(),
            active_ttl: config.context.active_ttl(),
        });

        Self {
            bot,
            context: config.context.clone(),
            delivery: config.delivery.clone(),
            channel,
            gateway: Arc::new(gateway),
            store: Arc::new(store),
            started_at: Utc::now(),
        }
    }

    /// Override the process start time used as the staleness cutoff.
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn name(&self) -> &str {
        &self.bot.name
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Authenticate, start the sweeper, and open the event stream.
    ///
    /// A failed authentication is fatal for this bot.
    pub async fn start(self) -> Result<RunningBot, Error> {
        let identity = self.channel.connect().await.inspect_err(|e| {
            error!(bot = %self.bot.name, error = %e, "Bot failed to authenticate");
        })?;
        info!(
            bot = %self.bot.name,
            username = %identity.username,
            model = %self.gateway.model(),
            "Bot connected"
        );

        let events = self.channel.start().await?;
        let sweeper = self.store.spawn_sweeper(self.context.sweep_interval());

        let dispatcher = Dispatcher::new(
            self.bot.clone(),
            identity,
            Cutoff::for_bot(&self.bot, self.started_at),
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            PromptAssembler::from_config(self.bot.name.clone(), &self.context),
            Outbox::new(
                Arc::clone(&self.channel),
                self.delivery.max_message_length,
                self.delivery.part_delay(),
            ),
        );

        Ok(RunningBot {
            name: self.bot.name,
            channel: self.channel,
            store: self.store,
            dispatcher: Arc::new(dispatcher),
            events,
            sweeper,
        })
    }

    /// Start and run until the event stream ends.
    pub async fn run(self) -> Result<(), Error> {
        self.start().await?.run().await
    }
}

/// A connected bot consuming its event stream.
pub struct RunningBot {
    name: String,
    channel: Arc<dyn Channel>,
    store: Arc<ContextStore>,
    dispatcher: Arc<Dispatcher>,
    events: mpsc::Receiver<Result<InboundEvent, ChannelError>>,
    sweeper: JoinHandle<()>,
}

impl RunningBot {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Handle events until the channel closes, one task per event.
    ///
    /// In-flight handlers are awaited before returning.
    pub async fn run(mut self) -> Result<(), Error> {
        let mut handlers = JoinSet::new();

        while let Some(item) = self.events.recv().await {
            match item {
                Ok(event) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    handlers.spawn(async move {
                        dispatcher.handle(event).await;
                    });
                }
                Err(e) => warn!(bot = %self.name, error = %e, "Channel error"),
            }

            while let Some(done) = handlers.try_join_next() {
                self.log_handler_exit(done);
            }
        }

        while let Some(done) = handlers.join_next().await {
            self.log_handler_exit(done);
        }

        info!(bot = %self.name, "Event stream closed");
        self.shutdown().await
    }

    fn log_handler_exit(&self, result: Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                error!(bot = %self.name, "Event handler panicked");
            }
        }
    }

    async fn shutdown(&self) -> Result<(), Error> {
        self.sweeper.abort();
        // Give the channel a moment to flush; a hung stop must not block exit.
        match tokio::time::timeout(Duration::from_secs(5), self.channel.stop()).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(bot = %self.name, "Channel stop timed out");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmux_providers::testing::ScriptedProvider;
    use chatmux_channels::LoopbackChannel;
    use chatmux_core::channel::BotIdentity;
    use chatmux_core::event::{ChatKind, ChatRef, UserRef};
    use chatmux_memory::{ContextKey, Namespace};

    fn bot_config() -> BotConfig {
        BotConfig {
            name: "Ava".into(),
            telegram_token: "123:abc".into(),
            api_key: None,
            system_prompt: "You are Ava.".into(),
            post_comment_prompt: "Comment: {postText}".into(),
            comment_probability: 1.0,
            ignore_older_than_minutes: None,
            model: Some("persona-model".into()),
        }
    }

    fn identity() -> BotIdentity {
        BotIdentity {
            id: 777,
            username: "ava_bot".into(),
        }
    }

    #[tokio::test]
    async fn failed_authentication_is_fatal() {
        let channel = Arc::new(LoopbackChannel::new(identity()).failing_connect());
        let instance = BotInstance::new(
            bot_config(),
            &AppConfig::default(),
            channel,
            Arc::new(ScriptedProvider::replies([])),
        );
        let err = instance.run().await.unwrap_err();
        assert!(matches!(err, Error::Channel(ChannelError::AuthenticationFailed { .. })));
    }

    #[tokio::test]
    async fn events_are_handled_until_the_stream_closes() {
        let channel = Arc::new(LoopbackChannel::new(identity()));
        let provider = Arc::new(ScriptedProvider::replies(["Hello!"]));
        let instance = BotInstance::new(
            bot_config(),
            &AppConfig::default(),
            channel.clone(),
            provider.clone(),
        );

        let running = instance.start().await.unwrap();
        let event = InboundEvent::new(ChatRef::new(5, ChatKind::Private), 1, "@ava_bot hi")
            .with_sender(UserRef::new(42, "Dana"));
        channel.inject(event).await.unwrap();
        channel.close();

        let store = Arc::clone(running.store());
        running.run().await.unwrap();

        assert_eq!(channel.sent().len(), 1);
        assert_eq!(provider.last_request().unwrap().model, "persona-model");
        let ctx = store
            .get(Namespace::User, &ContextKey::new(5, 42, "Ava"))
            .await
            .unwrap();
        assert_eq!(ctx.message_count, 2);
    }
}
