//! Console channel — talk to one bot persona from the terminal.
//!
//! Reads lines from stdin and writes replies to stdout. Every line is
//! delivered as a message in a private chat that mentions the bot, so it
//! goes through the same dispatch path as a Telegram mention.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chatmux_core::channel::{BotIdentity, Channel};
use chatmux_core::error::ChannelError;
use chatmux_core::event::{ChatKind, ChatRef, InboundEvent, UserRef};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Chat id used for the console session.
pub const CONSOLE_CHAT_ID: i64 = 1;
/// User id of the local operator.
pub const CONSOLE_USER_ID: i64 = 1;

/// Interactive stdin/stdout channel.
pub struct ConsoleChannel {
    identity: BotIdentity,
    next_id: Arc<AtomicI64>,
}

impl ConsoleChannel {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            identity: BotIdentity {
                id: 0,
                username: bot_name.into(),
            },
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    fn event_for(identity: &BotIdentity, message_id: i64, line: &str) -> InboundEvent {
        InboundEvent::new(
            ChatRef::new(CONSOLE_CHAT_ID, ChatKind::Private),
            message_id,
            format!("@{} {line}", identity.username),
        )
        .with_sender(UserRef::new(CONSOLE_USER_ID, "You"))
    }
}

fn is_exit_command(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q")
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn connect(&self) -> Result<BotIdentity, ChannelError> {
        Ok(self.identity.clone())
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let identity = self.identity.clone();
        let next_id = Arc::clone(&self.next_id);

        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if is_exit_command(line) {
                            break;
                        }

                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        let event = Self::event_for(&identity, id, line);
                        if tx.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(
        &self,
        _chat_id: i64,
        text: &str,
        _reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        println!("{}: {text}", self.identity.username);
        Ok(())
    }
}
