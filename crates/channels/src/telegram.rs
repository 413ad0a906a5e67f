//! Telegram channel adapter.
//!
//! Talks to the Bot API over HTTPS with long polling (`getUpdates`). Raw
//! updates are decoded into [`InboundEvent`]s right here; nothing past this
//! module sees Telegram JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatmux_core::channel::{BotIdentity, Channel};
use chatmux_core::error::ChannelError;
use chatmux_core::event::{ChatKind, ChatRef, InboundEvent, MessageRef, UserRef};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram channel configuration.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Bot API base URL (overridable for a local Bot API server).
    pub api_base: String,
    /// Seconds the server may hold a `getUpdates` call open.
    pub poll_timeout_secs: u64,
    /// Pause after a failed poll before trying again.
    pub poll_retry_delay: Duration,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.into(),
            poll_timeout_secs: 30,
            poll_retry_delay: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

/// Telegram channel adapter.
pub struct TelegramChannel {
    api: Arc<BotApi>,
    config: TelegramConfig,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Result<Self, ChannelError> {
        // Long polls hold the connection open; leave headroom over the poll timeout.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()
            .map_err(|e| {
                ChannelError::NotConfigured(format!("Failed to create HTTP client: {e}"))
            })?;

        let api = BotApi {
            client,
            base: format!(
                "{}/bot{}",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
        };

        Ok(Self {
            api: Arc::new(api),
            config,
            poller: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn connect(&self) -> Result<BotIdentity, ChannelError> {
        let me: TgUser = self.api.call("getMe", &serde_json::json!({})).await.map_err(|e| {
            ChannelError::AuthenticationFailed {
                channel: "telegram".into(),
                reason: e.to_string(),
            }
        })?;

        let username = me.username.unwrap_or_default();
        info!(id = me.id, username = %username, "Telegram bot authenticated");
        Ok(BotIdentity {
            id: me.id,
            username,
        })
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(64);
        let api = Arc::clone(&self.api);
        let poll_timeout = self.config.poll_timeout_secs;
        let retry_delay = self.config.poll_retry_delay;

        let handle = tokio::spawn(async move {
            let mut offset: Option<i64> = None;
            info!("Telegram long polling started");

            loop {
                let mut params = serde_json::json!({
                    "timeout": poll_timeout,
                    "allowed_updates": ["message"],
                });
                if let Some(offset) = offset {
                    params["offset"] = serde_json::json!(offset);
                }

                let updates: Vec<serde_json::Value> = match api.call("getUpdates", &params).await {
                    Ok(updates) => updates,
                    Err(e) => {
                        warn!(error = %e, "getUpdates failed");
                        if tx.send(Err(e)).await.is_err() {
                            break;
                        }
                        tokio::time::sleep(retry_delay).await;
                        continue;
                    }
                };

                for raw in updates {
                    if let Some(id) = raw.get("update_id").and_then(serde_json::Value::as_i64) {
                        offset = Some(id + 1);
                    }
                    // One undecodable update must not stall the offset.
                    let update: TgUpdate = match serde_json::from_value(raw) {
                        Ok(update) => update,
                        Err(e) => {
                            warn!(error = %e, "Skipping undecodable update");
                            continue;
                        }
                    };
                    let Some(event) = update.into_event() else {
                        continue;
                    };
                    debug!(
                        chat_id = event.chat.id,
                        message_id = event.message_id,
                        "Update received"
                    );
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
            }
        });

        *self.poller.lock().await = Some(handle);
        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        let mut params = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(reply_to) = reply_to {
            params["reply_parameters"] = serde_json::json!({ "message_id": reply_to });
        }

        let _sent: serde_json::Value = self.api.call("sendMessage", &params).await?;
        debug!(chat_id, reply_to = ?reply_to, len = text.len(), "Telegram message sent");
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), ChannelError> {
        let params = serde_json::json!({ "chat_id": chat_id, "action": "typing" });
        let _ok: bool = self.api.call("sendChatAction", &params).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Telegram channel stopping");
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

// ── Bot API transport ─────────────────────────────────────────────────────

struct BotApi {
    client: reqwest::Client,
    /// `{api_base}/bot{token}`
    base: String,
}

impl BotApi {
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<T, ChannelError> {
        let url = format!("{}/{method}", self.base);
        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(format!("{method}: {}", e.without_url())))?;

        let body: TgResponse<T> = response.json().await.map_err(|e| {
            ChannelError::InvalidPayload(format!("{method}: {}", e.without_url()))
        })?;

        body.into_result(method)
    }
}

#[derive(Deserialize)]
struct TgResponse<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

impl<T> TgResponse<T> {
    fn into_result(self, method: &str) -> Result<T, ChannelError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: format!(
                    "{method}: {}",
                    self.description.as_deref().unwrap_or("request rejected")
                ),
            }),
        }
    }
}

// ── Update decoding ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TgUpdate {
    #[serde(default)]
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    date: i64,
    chat: TgChat,
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    sender_chat: Option<TgChat>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    reply_to_message: Option<Box<TgMessage>>,
    #[serde(default)]
    forward_origin: Option<TgForwardOrigin>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TgForwardOrigin {
    Channel { chat: TgChat },
    Chat { sender_chat: TgChat },
    User { sender_user: TgUser },
    #[serde(other)]
    Other,
}

impl TgUpdate {
    /// Messages in groups and private chats only; posts inside a channel
    /// itself have no discussion thread to reply in.
    fn into_event(self) -> Option<InboundEvent> {
        self.message.map(TgMessage::into_event)
    }
}

impl TgChat {
    fn into_ref(self) -> ChatRef {
        let kind = match self.kind.as_str() {
            "private" => ChatKind::Private,
            "group" => ChatKind::Group,
            "channel" => ChatKind::Channel,
            _ => ChatKind::Supergroup,
        };
        ChatRef {
            id: self.id,
            kind,
            title: self.title,
            username: self.username,
        }
    }
}

impl TgUser {
    fn into_ref(self) -> UserRef {
        UserRef {
            id: self.id,
            is_bot: self.is_bot,
            username: self.username,
            first_name: self.first_name,
        }
    }
}

impl TgForwardOrigin {
    fn into_chat(self) -> Option<ChatRef> {
        match self {
            Self::Channel { chat } => Some(chat.into_ref()),
            Self::Chat { sender_chat } => Some(sender_chat.into_ref()),
            Self::User { sender_user } => Some(ChatRef {
                id: sender_user.id,
                kind: ChatKind::Private,
                title: None,
                username: sender_user.username,
            }),
            Self::Other => None,
        }
    }
}

impl TgMessage {
    fn body(&mut self) -> Option<String> {
        self.text.take().or_else(|| self.caption.take())
    }

    fn into_event(mut self) -> InboundEvent {
        let text = self.body().unwrap_or_default();
        let reply_to = self.reply_to_message.take().map(|m| m.into_ref());
        InboundEvent {
            message_id: self.message_id,
            chat: self.chat.into_ref(),
            sender: self.from.map(TgUser::into_ref),
            text,
            reply_to,
            forward_origin: self.forward_origin.and_then(TgForwardOrigin::into_chat),
            sender_chat: self.sender_chat.map(TgChat::into_ref),
            timestamp: unix_to_utc(self.date),
        }
    }

    fn into_ref(mut self) -> MessageRef {
        let text = self.body();
        MessageRef {
            message_id: self.message_id,
            sender: self.from.map(TgUser::into_ref),
            sender_chat: self.sender_chat.map(TgChat::into_ref),
            forward_origin: self.forward_origin.and_then(TgForwardOrigin::into_chat),
            text,
        }
    }
}

fn unix_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
