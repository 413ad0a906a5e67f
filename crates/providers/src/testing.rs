//! Scripted provider for tests in this and downstream crates.
//!
//! Enabled for this crate's own tests and, elsewhere, through the
//! `testing` feature.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chatmux_core::error::ProviderError;
use chatmux_core::provider::{Provider, ProviderRequest, ProviderResponse};
use tokio::time::Instant;

/// A mock provider that replays scripted outcomes in order.
///
/// Every call is recorded with the (tokio) instant it arrived. Once the
/// script runs out every call fails with a network error.
pub struct ScriptedProvider {
    outcomes: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<(Instant, ProviderRequest)>>,
}

impl ScriptedProvider {
    pub fn new(outcomes: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replies<const N: usize>(replies: [&str; N]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.calls).iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        lock(&self.calls).last().map(|(_, r)| r.clone())
    }

    /// Time between consecutive calls.
    pub fn gaps(&self) -> Vec<Duration> {
        let calls = lock(&self.calls);
        calls.windows(2).map(|w| w[1].0 - w[0].0).collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        lock(&self.calls).push((Instant::now(), request.clone()));
        let next = lock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Network("script exhausted".into())));
        next.map(|content| ProviderResponse {
            content,
            model: request.model,
            usage: None,
        })
    }
}
