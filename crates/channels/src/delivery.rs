//! Outbound delivery — splitting, numbering, and pacing long replies.

use std::sync::Arc;
use std::time::Duration;

use chatmux_core::channel::Channel;
use chatmux_core::error::ChannelError;
use tracing::{debug, warn};

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Prefers paragraph breaks, then line breaks, then sentence ends, then
/// spaces. Falls back to a hard cut on a character boundary.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        // Byte offset just past the first `max_chars` characters, if the rest is longer.
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        let window = &remaining[..limit];
        let split_at = find_break(window).unwrap_or(limit);

        let chunk = remaining[..split_at].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

/// Best split position inside `window`, or `None` if there is no natural
/// break. Never returns 0.
fn find_break(window: &str) -> Option<usize> {
    let nonzero = |pos: Option<usize>| pos.filter(|&p| p > 0);

    nonzero(window.rfind("\n\n"))
        .or_else(|| nonzero(window.rfind('\n')))
        .or_else(|| {
            // Split after the punctuation, keep it with the sentence.
            [". ", "! ", "? "]
                .iter()
                .filter_map(|sep| window.rfind(sep))
                .max()
                .map(|p| p + 1)
        })
        .or_else(|| nonzero(window.rfind(' ')))
}

/// Split with room for `(i/N) ` prefixes, numbering the parts when there
/// is more than one.
pub fn number_parts(text: &str, max_chars: usize) -> Vec<String> {
    let mut parts = split_message(text, max_chars);
    if parts.len() <= 1 {
        return parts;
    }

    // The prefix width depends on N, which can grow once room is reserved.
    let mut total = parts.len();
    loop {
        let reserve = prefix_width(total);
        parts = split_message(text, max_chars.saturating_sub(reserve).max(1));
        if parts.len() == total {
            break;
        }
        total = parts.len();
    }

    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| format!("({}/{total}) {part}", i + 1))
        .collect()
}

fn prefix_width(total: usize) -> usize {
    // "(" + i + "/" + N + ") " with i at most as wide as N
    2 * total.to_string().len() + 4
}

/// Delivers replies through a [`Channel`], splitting them to fit.
pub struct Outbox {
    channel: Arc<dyn Channel>,
    max_chars: usize,
    part_delay: Duration,
}

impl Outbox {
    pub fn new(channel: Arc<dyn Channel>, max_chars: usize, part_delay: Duration) -> Self {
        Self {
            channel,
            max_chars,
            part_delay,
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Send `text` to `chat_id`, linking the first part to `reply_to`.
    ///
    /// Returns the number of parts sent. Stops at the first part that
    /// cannot be delivered.
    pub async fn deliver(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<usize, ChannelError> {
        let parts = number_parts(text, self.max_chars);
        let total = parts.len();

        for (i, part) in parts.iter().enumerate() {
            if i > 0 && !self.part_delay.is_zero() {
                tokio::time::sleep(self.part_delay).await;
            }
            let link = if i == 0 { reply_to } else { None };
            self.send_part(chat_id, part, link).await?;
            debug!(chat_id, part = i + 1, total, "Part delivered");
        }

        Ok(total)
    }

    async fn send_part(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        match self.channel.send(chat_id, text, reply_to).await {
            Ok(()) => Ok(()),
            Err(e) if reply_to.is_some() => {
                warn!(
                    chat_id,
                    reply_to = ?reply_to,
                    error = %e,
                    "Reply send failed, retrying unlinked"
                );
                self.channel.send(chat_id, text, None).await.inspect_err(|e| {
                    warn!(chat_id, error = %e, "Delivery failed");
                })
            }
            Err(e) => {
                warn!(chat_id, error = %e, "Delivery failed");
                Err(e)
            }
        }
    }
}
