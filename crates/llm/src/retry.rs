use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use concierge_core::config::LlmConfig;
use tracing::{error, info, warn};

use crate::model::{LlmClient, LlmError, LlmRequest, LlmResponse};

/// Fixed-delay retry for rate-limited calls. No backoff, no jitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(7) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(config.max_attempts, config.retry_delay())
    }

    /// Total attempts, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

pub trait RetryClassifier {
    fn is_rate_limited(&self) -> bool;
}

impl RetryClassifier for LlmError {
    fn is_rate_limited(&self) -> bool {
        LlmError::is_rate_limited(self)
    }
}

pub async fn call_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClassifier + Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_rate_limited() {
            error!(
                event_name = "llm.call.failed",
                operation = operation_name,
                attempt,
                error = %error,
                "call failed with a non-retryable error"
            );
            return Err(error);
        }

        warn!(
            event_name = "llm.call.rate_limited",
            operation = operation_name,
            attempt,
            max_attempts,
            error = %error,
            "rate limit hit"
        );

        if attempt >= max_attempts {
            error!(
                event_name = "llm.call.retries_exhausted",
                operation = operation_name,
                max_attempts,
                "giving up after {max_attempts} attempts"
            );
            return Err(error);
        }

        info!(
            event_name = "llm.call.retry_scheduled",
            operation = operation_name,
            delay_secs = policy.delay.as_secs_f64(),
            next_attempt = attempt + 1,
            "waiting before retry"
        );
        tokio::time::sleep(policy.delay).await;
        attempt += 1;
    }
}

/// Wraps any model client so every `generate` goes through [`call_with_retry`].
pub struct RetryingLlm<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: LlmClient> RetryingLlm<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingLlm<C> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let inner = &self.inner;
        call_with_retry(&self.policy, inner.model_name(), move || inner.generate(request)).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::{call_with_retry, RetryPolicy, RetryingLlm};
    use crate::model::{Content, LlmClient, LlmError, LlmRequest, LlmResponse};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(7))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_rate_limits_with_fixed_delays() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();

        let result = call_with_retry(&policy(), "test", move || async move {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 3 {
                Err(LlmError::RateLimited("quota".to_string()))
            } else {
                Ok("answer")
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(14), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(15), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn propagates_final_rate_limit_after_exhausting_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), LlmError> = call_with_retry(&policy(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::RateLimited("still throttled".to_string()))
        })
        .await;

        assert!(matches!(result, Err(LlmError::RateLimited(ref message)) if message == "still throttled"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_fail_without_waiting() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();

        let result: Result<(), LlmError> = call_with_retry(&policy(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Api { status: 400, message: "bad request".to_string() })
        })
        .await;

        assert!(matches!(result, Err(LlmError::Api { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_calls_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let zero = RetryPolicy::new(0, Duration::from_secs(7));

        let result: Result<(), LlmError> = call_with_retry(&zero, "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::RateLimited("quota".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_future_abandons_the_wait() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let long = RetryPolicy::new(3, Duration::from_secs(60));

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            call_with_retry(&long, "test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(LlmError::RateLimited("quota".to_string()))
            }),
        )
        .await;

        assert!(outcome.is_err(), "timeout fires during the retry delay");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct ScriptedLlm {
        outcomes: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            self.outcomes
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_client_wraps_generate() {
        let scripted = ScriptedLlm {
            outcomes: Mutex::new(VecDeque::from([
                Err(LlmError::RateLimited("quota".to_string())),
                Ok(LlmResponse {
                    content: Content::model_text("hello"),
                    finish_reason: None,
                    usage: None,
                }),
            ])),
        };
        let client = RetryingLlm::new(scripted, policy());

        let response = client.generate(&LlmRequest::default()).await.expect("retried");

        assert_eq!(response.content.text().as_deref(), Some("hello"));
        assert_eq!(client.model_name(), "scripted");
    }
}
