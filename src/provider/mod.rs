//! Provider seam and the retrying model caller.
//!
//! [`GenerateProvider`] is the abstract interface the rest of the core sees;
//! [`ModelCaller`] wraps it with timeout-bounded, retry/backoff call
//! semantics. Backoff sleeps block only the calling worker's task.

pub mod anthropic;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;

use crate::config::RetryConfig;

pub use anthropic::AnthropicAdapter;
pub use error::{ErrorContext, ProviderError, TRANSIENT_STATUSES};

/// One generation request as the provider sees it.
///
/// `top_p` rides along for log traceability; adapters that drive sampling via
/// temperature omit it from the outbound request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt_text: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

/// Structured result of one successful generation.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Concatenation of all text-bearing content blocks, trimmed.
    pub text: String,
    pub stop_reason: Option<String>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub request_id: Option<String>,
}

#[async_trait]
pub trait GenerateProvider: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}

// =============================================================================
// Retry policy
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_secs_f64(cfg.base_delay_s.max(0.0)),
            max_delay: Duration::from_secs_f64(cfg.max_delay_s.max(0.0)),
            jitter: cfg.jitter,
        }
    }

    /// Delay before retry `attempt_num` (1 for the first retry), including
    /// jitter when enabled.
    fn delay_before_retry(&self, attempt_num: u32) -> Duration {
        let delay = backoff_delay(self.base_delay, self.max_delay, attempt_num);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }
}

/// Exponential backoff without jitter: `min(max_delay, base * 2^(n-1))`.
pub fn backoff_delay(base: Duration, max: Duration, attempt_num: u32) -> Duration {
    let exp = attempt_num.saturating_sub(1).min(32);
    let raw = base.saturating_mul(2u32.saturating_pow(exp));
    raw.min(max)
}

// =============================================================================
// Model caller
// =============================================================================

/// Outcome of a call including the retries it consumed.
#[derive(Debug)]
pub struct CallOutcome {
    pub result: Result<GenerateResponse, ProviderError>,
    pub retry_count: u32,
}

/// Issues generation requests with retry/backoff on transient failures.
#[derive(Clone)]
pub struct ModelCaller {
    provider: Arc<dyn GenerateProvider>,
    policy: RetryPolicy,
}

impl ModelCaller {
    pub fn new(provider: Arc<dyn GenerateProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Attempt 0 is immediate; each retry sleeps per the policy first.
    /// Terminal errors return immediately without consuming further retries.
    pub async fn call(&self, req: &GenerateRequest) -> CallOutcome {
        let mut retry_count = 0u32;
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                retry_count += 1;
                sleep(self.policy.delay_before_retry(attempt)).await;
            }

            match self.provider.generate(req).await {
                Ok(resp) => {
                    return CallOutcome {
                        result: Ok(resp),
                        retry_count,
                    }
                }
                Err(err) => {
                    if !err.is_retryable() {
                        return CallOutcome {
                            result: Err(err),
                            retry_count,
                        };
                    }
                    tracing::warn!(
                        model = %req.model,
                        attempt,
                        error = %err,
                        "transient provider error"
                    );
                    last_err = Some(err);
                }
            }
        }

        CallOutcome {
            result: Err(last_err
                .unwrap_or_else(|| ProviderError::config("retry loop exited without an error"))),
            retry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, max, 5), Duration::from_secs(16));
        assert_eq!(backoff_delay(base, max, 6), Duration::from_secs(30));
        assert_eq!(backoff_delay(base, max, 20), Duration::from_secs(30));
    }

    #[test]
    fn backoff_is_nondecreasing() {
        let base = Duration::from_millis(250);
        let max = Duration::from_secs(10);
        let mut prev = Duration::ZERO;
        for n in 1..=16 {
            let d = backoff_delay(base, max, n);
            assert!(d >= prev);
            assert!(d <= max);
            prev = d;
        }
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: true,
        };
        for _ in 0..100 {
            let d = policy.delay_before_retry(2);
            assert!(d >= Duration::from_secs(2), "below 0.5x: {d:?}");
            assert!(d < Duration::from_secs(6), "at or above 1.5x: {d:?}");
        }
    }

    struct FlakyProvider {
        calls: AtomicU32,
        fail_first: u32,
        terminal: bool,
    }

    #[async_trait]
    impl GenerateProvider for FlakyProvider {
        async fn generate(
            &self,
            _req: &GenerateRequest,
        ) -> Result<GenerateResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                if self.terminal {
                    Err(ProviderError::invalid_request("nope"))
                } else {
                    Err(ProviderError::rate_limited(ErrorContext::new()))
                }
            } else {
                Ok(GenerateResponse {
                    text: "ok".into(),
                    stop_reason: Some("end_turn".into()),
                    input_tokens: Some(1),
                    output_tokens: Some(1),
                    request_id: None,
                })
            }
        }
    }

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: "claude-test".into(),
            prompt_text: "hi".into(),
            temperature: 0.0,
            max_tokens: 16,
            top_p: 1.0,
        }
    }

    #[tokio::test]
    async fn transient_errors_retry_until_success() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
            terminal: false,
        });
        let caller = ModelCaller::new(provider.clone(), quick_policy(3));
        let outcome = caller.call(&request()).await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 10,
            terminal: true,
        });
        let caller = ModelCaller::new(provider.clone(), quick_policy(5));
        let outcome = caller.call(&request()).await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error_and_count() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 10,
            terminal: false,
        });
        let caller = ModelCaller::new(provider.clone(), quick_policy(2));
        let outcome = caller.call(&request()).await;
        let err = outcome.result.unwrap_err();
        assert_eq!(err.code(), "rate_limited");
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
