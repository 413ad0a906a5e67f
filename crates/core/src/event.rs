//! Inbound events — the closed shape every platform adapter decodes into.
//!
//! The Telegram adapter fills these structs once, at the boundary. The
//! dispatch policy then pattern-matches on explicit optional fields
//! (`forward_origin`, `sender_chat`, `reply_to`) instead of probing raw JSON.

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of chat a [`ChatRef`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// A reference to a chat (private chat, group, or channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRef {
    pub id: i64,
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl ChatRef {
    pub fn new(id: i64, kind: ChatKind) -> Self {
        Self {
            id,
            kind,
            title: None,
            username: None,
        }
    }

    pub fn is_channel(&self) -> bool {
        self.kind == ChatKind::Channel
    }
}

/// A reference to a platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

impl UserRef {
    pub fn new(id: i64, first_name: impl Into<String>) -> Self {
        Self {
            id,
            is_bot: false,
            username: None,
            first_name: first_name.into(),
        }
    }
}

/// The message an inbound event replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_chat: Option<ChatRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_origin: Option<ChatRef>,
    /// Text or caption of the referenced message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessageRef {
    pub fn new(message_id: i64) -> Self {
        Self {
            message_id,
            sender: None,
            sender_chat: None,
            forward_origin: None,
            text: None,
        }
    }

    /// Whether the referenced message is a post relayed from a channel.
    pub fn is_channel_post(&self) -> bool {
        relayed_from_channel(self.forward_origin.as_ref(), self.sender_chat.as_ref())
    }

    /// Whether the referenced message was sent by the given user.
    pub fn is_from(&self, user_id: i64) -> bool {
        self.sender.as_ref().is_some_and(|s| s.id == user_id)
    }
}

/// A single inbound message, as seen by the dispatch policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Platform message id within `chat`
    pub message_id: i64,

    /// Where the message was posted
    pub chat: ChatRef,

    /// Who sent it (absent for posts signed by a chat)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserRef>,

    /// Text, or the caption of a media message
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageRef>,

    /// Original chat of a forwarded message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_origin: Option<ChatRef>,

    /// Chat the message was sent on behalf of; a linked channel relaying
    /// its post into the discussion group shows up here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_chat: Option<ChatRef>,

    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    /// A plain text message with no reply, forward, or sender chat.
    pub fn new(chat: ChatRef, message_id: i64, text: impl Into<String>) -> Self {
        Self {
            message_id,
            chat,
            sender: None,
            text: text.into(),
            reply_to: None,
            forward_origin: None,
            sender_chat: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_sender(mut self, sender: UserRef) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_reply_to(mut self, reply_to: MessageRef) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Forwarded from a channel, or auto-relayed from a linked channel.
    pub fn is_channel_post(&self) -> bool {
        relayed_from_channel(self.forward_origin.as_ref(), self.sender_chat.as_ref())
    }

    /// Whether `@handle` appears in the text as a whole username
    /// (case-insensitive).
    pub fn mentions(&self, handle: &str) -> bool {
        !mention_spans(&self.text, handle).is_empty()
    }

    pub fn sender_id(&self) -> Option<i64> {
        self.sender.as_ref().map(|s| s.id)
    }
}

/// Byte ranges of every `@handle` in `text`, matched case-insensitively.
///
/// A match must not be followed by another username character, so
/// `@news` does not match inside `@newsbot`.
pub fn mention_spans(text: &str, handle: &str) -> Vec<Range<usize>> {
    if handle.is_empty() {
        return Vec::new();
    }
    let needle = format!("@{handle}");
    let needle = needle.as_bytes();
    let bytes = text.as_bytes();

    let mut spans = Vec::new();
    let mut i = 0;
    while i + needle.len() <= bytes.len() {
        let end = i + needle.len();
        let whole = bytes.get(end).is_none_or(|&b| !is_username_byte(b));
        if whole && bytes[i..end].eq_ignore_ascii_case(needle) {
            spans.push(i..end);
            i = end;
        } else {
            i += 1;
        }
    }
    spans
}

fn is_username_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn relayed_from_channel(forward_origin: Option<&ChatRef>, sender_chat: Option<&ChatRef>) -> bool {
    forward_origin.is_some_and(ChatRef::is_channel) || sender_chat.is_some_and(ChatRef::is_channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> ChatRef {
        ChatRef::new(-100123, ChatKind::Supergroup)
    }

    #[test]
    fn forwarded_channel_message_is_a_post() {
        let mut event = InboundEvent::new(group(), 7, "Breaking news");
        event.forward_origin = Some(ChatRef::new(-100999, ChatKind::Channel));
        assert!(event.is_channel_post());
    }

    #[test]
    fn auto_relayed_linked_channel_message_is_a_post() {
        let mut event = InboundEvent::new(group(), 7, "Breaking news");
        event.sender_chat = Some(ChatRef::new(-100999, ChatKind::Channel));
        assert!(event.is_channel_post());
    }

    #[test]
    fn anonymous_admin_message_is_not_a_post() {
        // Anonymous group admins post with sender_chat = the group itself.
        let mut event = InboundEvent::new(group(), 7, "hello");
        event.sender_chat = Some(group());
        assert!(!event.is_channel_post());
    }

    #[test]
    fn forwarded_from_user_is_not_a_post() {
        let mut event = InboundEvent::new(group(), 7, "fwd");
        event.forward_origin = Some(ChatRef::new(42, ChatKind::Private));
        assert!(!event.is_channel_post());
    }

    #[test]
    fn mention_is_case_insensitive() {
        let event = InboundEvent::new(group(), 1, "hey @Ava_Bot what do you think?");
        assert!(event.mentions("ava_bot"));
        assert!(!event.mentions("other_bot"));
        assert!(!event.mentions(""));
    }

    #[test]
    fn mention_must_be_the_whole_username() {
        let event = InboundEvent::new(group(), 1, "@ava_bot2 and @newsbot, thoughts?");
        assert!(!event.mentions("ava_bot"));
        assert!(!event.mentions("news"));
        assert!(event.mentions("newsbot"));
        assert!(event.mentions("ava_bot2"));
    }

    #[test]
    fn mention_spans_are_byte_ranges() {
        let text = "héllo @Ava_Bot, @ava_bot!";
        let spans = mention_spans(text, "ava_bot");
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].clone()], "@Ava_Bot");
        assert_eq!(&text[spans[1].clone()], "@ava_bot");
    }

    #[test]
    fn reply_target_detection() {
        let mut target = MessageRef::new(5);
        target.sender = Some(UserRef {
            id: 777,
            is_bot: true,
            username: Some("ava_bot".into()),
            first_name: "Ava".into(),
        });
        assert!(target.is_from(777));
        assert!(!target.is_from(1));
        assert!(!target.is_channel_post());
    }
}
