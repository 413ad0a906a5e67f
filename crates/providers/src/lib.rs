//! Completion providers for chatmux.
//!
//! [`OpenAiCompatProvider`] implements `chatmux_core::Provider` against any
//! `/chat/completions` endpoint. [`CompletionGateway`] wraps a provider with
//! per-attempt timeouts and backoff for transport failures.

pub mod gateway;
pub mod openai_compat;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use gateway::{CompletionGateway, RetryPolicy, retry};
pub use openai_compat::OpenAiCompatProvider;
