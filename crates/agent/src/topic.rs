//! Topic inference — a short label for what a post is about.

use std::sync::Arc;

use chatmux_core::message::Message;
use chatmux_providers::CompletionGateway;
use tracing::{debug, warn};

/// Label used when a text is too short to have a topic.
pub const FALLBACK_TOPIC: &str = "general discussion";

/// Texts shorter than this (after trimming) get [`FALLBACK_TOPIC`].
const MIN_TEXT_CHARS: usize = 10;
/// Characters of the text submitted to the model.
const MAX_SUBMITTED_CHARS: usize = 500;
/// Length cap of the heuristic label.
const HEURISTIC_CHARS: usize = 50;

const TOPIC_PROMPT: &str = "Identify the main topic of the following text in 3 to 7 words. \
Reply with the topic only, without quotes or a trailing period.";

/// Derives topic labels, asking the model once and falling back to a
/// local heuristic.
pub struct TopicInference {
    gateway: Arc<CompletionGateway>,
}

impl TopicInference {
    pub fn new(gateway: Arc<CompletionGateway>) -> Self {
        Self { gateway }
    }

    /// Infer a topic for `text`. Never fails.
    pub async fn infer(&self, text: &str) -> String {
        let trimmed = text.trim();
        if trimmed.chars().count() < MIN_TEXT_CHARS {
            return FALLBACK_TOPIC.to_string();
        }

        let submitted: String = trimmed.chars().take(MAX_SUBMITTED_CHARS).collect();
        let messages = vec![Message::system(TOPIC_PROMPT), Message::user(submitted)];

        match self.gateway.complete_once(messages).await {
            Ok(reply) => {
                let topic = clean_label(&reply);
                debug!(topic = %topic, "Topic inferred");
                if topic.is_empty() {
                    FALLBACK_TOPIC.to_string()
                } else {
                    topic
                }
            }
            Err(e) => {
                warn!(error = %e, "Topic inference failed, using heuristic");
                heuristic_topic(trimmed)
            }
        }
    }
}

/// Strip surrounding quotes, periods, and whitespace.
fn clean_label(raw: &str) -> String {
    raw.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '"' | '\'' | '.' | '“' | '”' | '«' | '»')
    })
    .to_string()
}

/// The first sentence, capped; or just the first characters when there is
/// no usable sentence end.
pub fn heuristic_topic(text: &str) -> String {
    let text = text.trim();
    match text.find(['.', '!', '?']) {
        Some(end) if end > 0 => text[..end].chars().take(HEURISTIC_CHARS).collect(),
        _ => text.chars().take(HEURISTIC_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmux_providers::testing::ScriptedProvider;
    use chatmux_core::error::ProviderError;

    fn inference(provider: Arc<ScriptedProvider>) -> TopicInference {
        TopicInference::new(Arc::new(CompletionGateway::new(provider, "m")))
    }

    #[tokio::test]
    async fn short_text_skips_the_model() {
        let provider = Arc::new(ScriptedProvider::replies(["unused"]));
        let topics = inference(provider.clone());
        assert_eq!(topics.infer("  hi there ").await, FALLBACK_TOPIC);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn model_label_is_cleaned() {
        let provider = Arc::new(ScriptedProvider::replies(["  \"Price increase.\" \n"]));
        let topics = inference(provider.clone());
        assert_eq!(topics.infer("Breaking: prices rise 5%").await, "Price increase");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_label_becomes_fallback() {
        let provider = Arc::new(ScriptedProvider::replies(["\"\""]));
        let topics = inference(provider);
        assert_eq!(topics.infer("Something long enough to ask about").await, FALLBACK_TOPIC);
    }

    #[tokio::test]
    async fn failure_uses_heuristic_without_retrying() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Network(
            "down".into(),
        ))]));
        let topics = inference(provider.clone());
        assert_eq!(
            topics.infer("Rates are going up. More news later!").await,
            "Rates are going up"
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn long_text_is_truncated_before_submission() {
        let provider = Arc::new(ScriptedProvider::replies(["topic"]));
        let topics = inference(provider.clone());
        topics.infer(&"x".repeat(2000)).await;
        let request = provider.last_request().unwrap();
        assert_eq!(request.messages[1].content.chars().count(), 500);
    }

    #[test]
    fn heuristic_cases() {
        assert_eq!(heuristic_topic("Hello world. Bye"), "Hello world");
        assert_eq!(heuristic_topic("What now? fine"), "What now");
        assert_eq!(heuristic_topic(".leading dot text"), ".leading dot text");
        let long = "a".repeat(80);
        assert_eq!(heuristic_topic(&long).len(), 50);
        let long_sentence = format!("{}. tail", "b".repeat(70));
        assert_eq!(heuristic_topic(&long_sentence), "b".repeat(50));
    }
}
