//! # chatmux core
//!
//! Domain types, traits, and error definitions shared by every chatmux crate.
//! Nothing in here talks to the network: the completion API and the
//! messaging platform are reached through the [`Provider`] and [`Channel`]
//! traits, implemented in their own crates.

pub mod channel;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use channel::{BotIdentity, Channel};
pub use error::{ChannelError, Error, ProviderError, Result};
pub use event::{ChatKind, ChatRef, InboundEvent, MessageRef, UserRef};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
