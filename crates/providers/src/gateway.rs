//! Completion gateway — the retrying wrapper around a [`Provider`].
//!
//! Only failures that never produced an HTTP response are retried:
//! transport errors and per-attempt timeouts. Anything the server answered
//! (429, auth errors, other non-2xx, malformed bodies) is returned as-is on
//! the first occurrence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chatmux_config::AppConfig;
use chatmux_core::error::ProviderError;
use chatmux_core::message::Message;
use chatmux_core::provider::{Provider, ProviderRequest};
use tracing::{debug, warn};

/// Exponential backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }

    pub fn is_retryable(&self, error: &ProviderError) -> bool {
        error.is_transient()
    }
}

/// Run `op` until it succeeds, fails terminally, or retries run out.
///
/// On exhaustion the last error is returned.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if policy.is_retryable(&e) && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient completion failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sends prompts to one provider with a fixed model and sampling settings.
pub struct CompletionGateway {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: Option<u32>,
    temperature: f32,
    policy: RetryPolicy,
    timeout: Duration,
}

impl CompletionGateway {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: None,
            temperature: 0.7,
            policy: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build a gateway for one bot from the application settings.
    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig, model: &str) -> Self {
        Self::new(provider, model)
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature)
            .with_policy(RetryPolicy::new(
                config.completion.max_retries,
                config.completion.backoff_base(),
            ))
            .with_timeout(config.completion.timeout())
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Complete with the gateway's own retry policy.
    pub async fn complete(&self, messages: Vec<Message>) -> Result<String, ProviderError> {
        self.complete_with(messages, &self.policy, self.timeout).await
    }

    /// Single attempt, no retries.
    pub async fn complete_once(&self, messages: Vec<Message>) -> Result<String, ProviderError> {
        self.complete_with(messages, &RetryPolicy::none(), self.timeout)
            .await
    }

    pub async fn complete_with(
        &self,
        messages: Vec<Message>,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        retry(policy, || {
            let request = request.clone();
            async move {
                debug!(
                    provider = %self.provider.name(),
                    model = %request.model,
                    "Completion attempt"
                );
                match tokio::time::timeout(timeout, self.provider.complete(request)).await {
                    Ok(result) => result.map(|response| response.content),
                    Err(_) => Err(ProviderError::Timeout(format!(
                        "No response within {}ms",
                        timeout.as_millis()
                    ))),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use async_trait::async_trait;
    use chatmux_core::provider::ProviderResponse;
    use tokio::time::Instant;

    /// Provider that never answers.
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            std::future::pending().await
        }
    }

    fn network() -> Result<String, ProviderError> {
        Err(ProviderError::Network("connection reset".into()))
    }

    #[test]
    fn delays_double_from_the_base() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        assert!(policy.delay_for_attempt(64) >= policy.delay_for_attempt(31));
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&ProviderError::Network("x".into())));
        assert!(policy.is_retryable(&ProviderError::Timeout("x".into())));
        assert!(!policy.is_retryable(&ProviderError::RateLimited { retry_after_secs: 1 }));
        assert!(!policy.is_retryable(&ProviderError::AuthenticationFailed("x".into())));
        assert!(!policy.is_retryable(&ProviderError::ApiError {
            status_code: 500,
            message: "x".into()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_exponentially() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            network(),
            network(),
            network(),
            Ok("finally".into()),
        ]));
        let gateway = CompletionGateway::new(provider.clone(), "gpt-4o-mini");

        let reply = gateway.complete(vec![Message::user("hi")]).await.unwrap();

        assert_eq!(reply, "finally");
        assert_eq!(provider.call_count(), 4);
        assert_eq!(
            provider.gaps(),
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_the_last_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            network(),
            network(),
            network(),
            Err(ProviderError::Network("still down".into())),
        ]));
        let gateway = CompletionGateway::new(provider.clone(), "m");

        let err = gateway.complete(vec![Message::user("hi")]).await.unwrap_err();

        assert_eq!(provider.call_count(), 4);
        match err {
            ProviderError::Network(msg) => assert_eq!(msg, "still down"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::ApiError {
            status_code: 400,
            message: "bad request".into(),
        })]));
        let gateway = CompletionGateway::new(provider.clone(), "m");

        let err = gateway.complete(vec![Message::user("hi")]).await.unwrap_err();

        assert_eq!(provider.call_count(), 1);
        assert!(matches!(err, ProviderError::ApiError { status_code: 400, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_terminal() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::RateLimited {
            retry_after_secs: 5,
        })]));
        let gateway = CompletionGateway::new(provider.clone(), "m");

        let err = gateway.complete(vec![Message::user("hi")]).await.unwrap_err();

        assert_eq!(provider.call_count(), 1);
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn complete_once_never_retries() {
        let provider = Arc::new(ScriptedProvider::new(vec![network(), Ok("late".into())]));
        let gateway = CompletionGateway::new(provider.clone(), "m");

        assert!(gateway.complete_once(vec![Message::user("hi")]).await.is_err());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempts_time_out_and_are_retried() {
        let gateway = CompletionGateway::new(Arc::new(HangingProvider), "m")
            .with_timeout(Duration::from_secs(30))
            .with_policy(RetryPolicy::new(1, Duration::from_millis(1000)));

        let started = Instant::now();
        let err = gateway.complete(vec![Message::user("hi")]).await.unwrap_err();

        assert!(matches!(err, ProviderError::Timeout(_)));
        // two 30 s attempts plus one 1 s backoff
        assert_eq!(started.elapsed(), Duration::from_secs(61));
    }

    #[tokio::test]
    async fn request_carries_model_and_sampling_settings() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("ok".into())]));
        let gateway = CompletionGateway::new(provider.clone(), "gpt-4o-mini")
            .with_max_tokens(1000)
            .with_temperature(0.2);

        gateway
            .complete(vec![Message::system("be brief"), Message::user("hi")])
            .await
            .unwrap();

        let requests = provider.requests();
        assert_eq!(requests[0].model, "gpt-4o-mini");
        assert_eq!(requests[0].max_tokens, Some(1000));
        assert_eq!(requests[0].messages.len(), 2);
        assert!((requests[0].temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn from_config_applies_completion_settings() {
        let mut config = AppConfig::default();
        config.completion.max_retries = 5;
        config.completion.backoff_base_ms = 250;
        let gateway = CompletionGateway::from_config(
            Arc::new(ScriptedProvider::new(vec![])),
            &config,
            "custom-model",
        );
        assert_eq!(gateway.policy, RetryPolicy::new(5, Duration::from_millis(250)));
        assert_eq!(gateway.model(), "custom-model");
        assert_eq!(gateway.max_tokens, Some(1000));
    }
}
