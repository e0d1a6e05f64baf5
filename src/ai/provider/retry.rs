//! Retrying Engine Wrapper
//!
//! Retries retryable engine failures with exponential backoff and random
//! jitter. Non-retryable categories (auth, bad request, unavailable) fail
//! immediately so the pipeline can degrade to its fallbacks without delay.
//!
//! For streams only the initial request is retried; a failure mid-stream is
//! surfaced to the consumer.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{ChunkStream, CompletionEngine, ErrorClassifier, LlmError, SharedEngine};
use crate::constants::retry as retry_constants;
use crate::types::Result;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: retry_constants::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(retry_constants::BASE_DELAY_MS),
            max_delay: Duration::from_secs(retry_constants::MAX_DELAY_SECS),
            backoff_factor: retry_constants::BACKOFF_FACTOR,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

pub struct RetryingEngine {
    inner: SharedEngine,
    config: RetryConfig,
}

impl RetryingEngine {
    pub fn new(inner: SharedEngine, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut delay = self.config.base_delay;
        let mut attempt = 0u32;

        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let classified = ErrorClassifier::classify_error(&err, self.inner.name());
                    if !classified.is_retryable() || attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    attempt += 1;

                    let wait = retry_wait(&classified, delay, self.config.max_delay)
                        + random_jitter(delay);
                    warn!(
                        "{} {} failed ({}), retry {}/{} in {:?}",
                        self.inner.name(),
                        operation,
                        classified.category,
                        attempt,
                        self.config.max_retries,
                        wait
                    );
                    sleep(wait).await;
                    delay = calculate_backoff(delay, self.config.backoff_factor, self.config.max_delay);
                }
            }
        }
    }
}

#[async_trait]
impl CompletionEngine for RetryingEngine {
    async fn generate(&self, system: &str, user: &str, max_tokens: usize) -> Result<String> {
        self.with_retry("generate", || self.inner.generate(system, user, max_tokens))
            .await
    }

    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        max_tokens: usize,
    ) -> Result<ChunkStream> {
        debug!("Opening stream via {}", self.inner.name());
        self.with_retry("stream", || {
            self.inner.generate_stream(system, user, max_tokens)
        })
        .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// The error's recommended delay, capped at `max_delay` but never shorter
/// than the current backoff step
fn retry_wait(error: &LlmError, backoff: Duration, max_delay: Duration) -> Duration {
    error.recommended_delay().min(max_delay).max(backoff)
}

/// Up to a quarter of `base_delay`, from the thread-local RNG
fn random_jitter(base_delay: Duration) -> Duration {
    let max_jitter_ms = (base_delay.as_millis() as u64) / 4;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_jitter_ms))
}

/// Exponential backoff with cap
fn calculate_backoff(current: Duration, factor: f32, max: Duration) -> Duration {
    let next = Duration::from_secs_f32(current.as_secs_f32() * factor);
    std::cmp::min(next, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, LlmError, VerigenError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with `category`, then succeeds
    struct FlakyEngine {
        calls: AtomicU32,
        failures: u32,
        category: ErrorCategory,
    }

    #[async_trait]
    impl CompletionEngine for FlakyEngine {
        async fn generate(&self, _s: &str, _u: &str, _m: usize) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(VerigenError::Llm(
                    LlmError::new(self.category, "flaky").retry_after(Duration::from_millis(1)),
                ))
            } else {
                Ok("ok".to_string())
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }

        fn model(&self) -> &str {
            "flaky-1"
        }
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let inner = Arc::new(FlakyEngine {
            calls: AtomicU32::new(0),
            failures: 2,
            category: ErrorCategory::Transient,
        });
        let engine = RetryingEngine::new(inner.clone(), fast_config(3));
        assert_eq!(engine.generate("s", "u", 1).await.unwrap(), "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let inner = Arc::new(FlakyEngine {
            calls: AtomicU32::new(0),
            failures: 10,
            category: ErrorCategory::Network,
        });
        let engine = RetryingEngine::new(inner.clone(), fast_config(2));
        assert!(engine.generate("s", "u", 1).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_unavailable() {
        let inner = Arc::new(FlakyEngine {
            calls: AtomicU32::new(0),
            failures: 10,
            category: ErrorCategory::Unavailable,
        });
        let engine = RetryingEngine::new(inner.clone(), fast_config(5));
        assert!(engine.generate("s", "u", 1).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_wait_uses_recommended_delay() {
        let step = Duration::from_millis(500);
        let max = Duration::from_secs(10);

        // Hint wins over the category default
        let hinted = LlmError::new(ErrorCategory::RateLimit, "slow down").retry_after(Duration::from_secs(2));
        assert_eq!(retry_wait(&hinted, step, max), Duration::from_secs(2));

        // Category default, capped
        let limited = LlmError::new(ErrorCategory::RateLimit, "slow down");
        assert_eq!(retry_wait(&limited, step, max), max);

        // Never below the backoff step
        let parse = LlmError::new(ErrorCategory::ParseError, "bad json");
        assert_eq!(retry_wait(&parse, Duration::from_secs(3), max), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_is_capped() {
        let next = calculate_backoff(Duration::from_secs(20), 2.0, Duration::from_secs(30));
        assert_eq!(next, Duration::from_secs(30));
    }
}
