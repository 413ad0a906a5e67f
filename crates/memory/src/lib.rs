//! Short-lived conversational memory for chatmux bots.
//!
//! Each bot owns one [`ContextStore`] holding two disjoint namespaces of
//! [`ConversationContext`]s: one per user and one per channel post. Contexts
//! are bounded in length and evicted after a period of inactivity. Nothing
//! is persisted across restarts.

pub mod context;
pub mod store;

pub use context::{ContextKey, ConversationContext, Namespace};
pub use store::{ContextCounts, ContextStore, StorePolicy, SweepReport};
