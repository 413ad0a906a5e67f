//! Messaging channels for chatmux.
//!
//! Each channel connects one bot account to a platform and relays decoded
//! events in and plain text out. Channels are trait-based; the dispatch
//! policy never sees platform payloads.
//!
//! Available channels:
//! - **Telegram** — Bot API over HTTPS long polling
//! - **Console** — stdin/stdout, one persona at a time
//! - **Loopback** — in-process, for tests
//!
//! [`Outbox`] sits on top of any channel and handles long replies.

pub mod console;
pub mod delivery;
pub mod loopback;
pub mod telegram;

pub use console::ConsoleChannel;
pub use delivery::{Outbox, number_parts, split_message};
pub use loopback::{LoopbackChannel, SentMessage};
pub use telegram::{TelegramChannel, TelegramConfig};
