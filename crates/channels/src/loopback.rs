//! Loopback channel — an in-process platform for tests and local runs.
//!
//! Events are injected by the caller and every outbound send is recorded,
//! so a whole bot can be driven without network access.

use std::sync::Mutex;

use async_trait::async_trait;
use chatmux_core::channel::{BotIdentity, Channel};
use chatmux_core::error::ChannelError;
use chatmux_core::event::InboundEvent;
use tokio::sync::mpsc;
use tracing::debug;

/// One recorded outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
    pub reply_to: Option<i64>,
}

/// In-process channel with scripted identity and recorded output.
pub struct LoopbackChannel {
    identity: BotIdentity,
    inject_tx: Mutex<Option<mpsc::Sender<Result<InboundEvent, ChannelError>>>>,
    sent: Mutex<Vec<SentMessage>>,
    typing: Mutex<Vec<i64>>,
    reject_replies: bool,
    fail_connect: bool,
}

impl LoopbackChannel {
    pub fn new(identity: BotIdentity) -> Self {
        Self {
            identity,
            inject_tx: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
            reject_replies: false,
            fail_connect: false,
        }
    }

    /// Fail every send that carries a reply link, like a platform whose
    /// reply target was deleted.
    pub fn rejecting_replies(mut self) -> Self {
        self.reject_replies = true;
        self
    }

    /// Fail authentication at [`Channel::connect`].
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Inject an event as if it came from the platform.
    pub async fn inject(&self, event: InboundEvent) -> Result<(), ChannelError> {
        let tx = self
            .inject_tx
            .lock()
            .map_err(|_| ChannelError::ConnectionLost("Loopback state poisoned".into()))?
            .clone();
        match tx {
            Some(tx) => tx
                .send(Ok(event))
                .await
                .map_err(|_| ChannelError::ConnectionLost("Message channel closed".into())),
            None => Err(ChannelError::ConnectionLost("Channel not started".into())),
        }
    }

    /// Close the inbound stream, ending the bot's receive loop.
    pub fn close(&self) {
        if let Ok(mut tx) = self.inject_tx.lock() {
            tx.take();
        }
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Chats that received a typing indicator, in order.
    pub fn typing(&self) -> Vec<i64> {
        self.typing.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn connect(&self) -> Result<BotIdentity, ChannelError> {
        if self.fail_connect {
            return Err(ChannelError::AuthenticationFailed {
                channel: "loopback".into(),
                reason: "Unauthorized".into(),
            });
        }
        Ok(self.identity.clone())
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(64);
        let mut inject_tx = self
            .inject_tx
            .lock()
            .map_err(|_| ChannelError::ConnectionLost("Loopback state poisoned".into()))?;
        *inject_tx = Some(tx);
        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        if self.reject_replies && reply_to.is_some() {
            return Err(ChannelError::DeliveryFailed {
                channel: "loopback".into(),
                reason: "message to reply not found".into(),
            });
        }
        debug!(chat_id, reply_to = ?reply_to, len = text.len(), "Loopback send");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMessage {
                chat_id,
                text: text.to_string(),
                reply_to,
            });
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), ChannelError> {
        if let Ok(mut typing) = self.typing.lock() {
            typing.push(chat_id);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmux_core::event::{ChatKind, ChatRef};

    fn identity() -> BotIdentity {
        BotIdentity {
            id: 777,
            username: "ava_bot".into(),
        }
    }

    #[tokio::test]
    async fn injected_events_reach_the_receiver() {
        let ch = LoopbackChannel::new(identity());
        let mut rx = ch.start().await.unwrap();
        let event = InboundEvent::new(ChatRef::new(1, ChatKind::Private), 3, "hi");
        ch.inject(event.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), event);

        ch.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn inject_before_start_fails() {
        let ch = LoopbackChannel::new(identity());
        let event = InboundEvent::new(ChatRef::new(1, ChatKind::Private), 3, "hi");
        assert!(ch.inject(event).await.is_err());
    }

    #[tokio::test]
    async fn sends_are_recorded() {
        let ch = LoopbackChannel::new(identity());
        ch.send(5, "hello", Some(9)).await.unwrap();
        assert_eq!(
            ch.sent(),
            vec![SentMessage {
                chat_id: 5,
                text: "hello".into(),
                reply_to: Some(9)
            }]
        );
    }

    #[tokio::test]
    async fn rejecting_replies_only_fails_linked_sends() {
        let ch = LoopbackChannel::new(identity()).rejecting_replies();
        assert!(ch.send(5, "a", Some(1)).await.is_err());
        assert!(ch.send(5, "b", None).await.is_ok());
        assert_eq!(ch.sent().len(), 1);
    }

    #[tokio::test]
    async fn connect_reports_identity_or_fails() {
        assert_eq!(LoopbackChannel::new(identity()).connect().await.unwrap(), identity());
        assert!(LoopbackChannel::new(identity()).failing_connect().connect().await.is_err());
    }
}
