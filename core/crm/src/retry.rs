//! Retry strategy with exponential backoff for transient errors.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crmsync_common::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to every computed delay.
    pub max_jitter: Duration,
    /// Maximum delay (cap for exponential growth and `Retry-After` hints).
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(250),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Set base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set maximum jitter. Zero disables jitter.
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate delay for a given attempt number (0 = first retry).
    ///
    /// `base * 2^attempt`, capped at `max_delay`, plus `rand(0..=max_jitter)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let exponential = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        exponential + self.jitter()
    }

    /// Delay to honor for a failed attempt, preferring the server's hint.
    pub fn delay_for_error(&self, attempt: u32, err: &Error) -> Duration {
        match err.retry_after() {
            Some(hint) if !hint.is_zero() => hint.min(self.max_delay),
            _ => self.delay_for_attempt(attempt),
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as f64;
        if max_ms <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_millis((rand::random::<f64>() * (max_ms + 1.0)).floor() as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Retry executor for running operations with retry logic.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation, retrying transient errors.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(operation, Error::is_transient)
            .await
    }

    /// Execute with a custom retry condition.
    ///
    /// Errors failing `should_retry` propagate immediately. Once attempts
    /// are exhausted the last error is returned.
    pub async fn execute_with_condition<F, Fut, T, C>(
        &self,
        operation: F,
        should_retry: C,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !should_retry(&err) {
                        return Err(err);
                    }

                    if attempt >= self.config.max_retries {
                        warn!(
                            "Operation failed after {} attempts: {}",
                            attempt + 1,
                            err
                        );
                        return Err(err);
                    }

                    let delay = self.config.delay_for_error(attempt, &err);
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt + 1,
                        err,
                        delay
                    );

                    attempt += 1;
                    sleep(delay).await;
                }
            }
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
