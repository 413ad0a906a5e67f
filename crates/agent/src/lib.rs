//! The per-bot pipeline — from an inbound event to a delivered reply.
//!
//! 1. **Classify** the event (channel post, direct, stale, ignored)
//! 2. **Infer a topic** for posts and replies to posts
//! 3. **Update context** in the bot's store
//! 4. **Assemble the prompt** (system, reinforcement, topic, history)
//! 5. **Complete** through the retrying gateway
//! 6. **Deliver** the reply through the outbox
//!
//! [`BotInstance`] wires these together for one bot account.

pub mod assembler;
pub mod dispatch;
pub mod instance;
pub mod topic;

pub use assembler::PromptAssembler;
pub use dispatch::{Cutoff, Dispatcher, EventClass, classify, sanitize_reply, strip_handle};
pub use instance::{BotInstance, RunningBot};
pub use topic::{FALLBACK_TOPIC, TopicInference, heuristic_topic};
