//! Retry logic for directory operations.
//!
//! Transient (transport) failures are retried up to a fixed number of
//! attempts; permanent failures return immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ConnectorResult;

/// Total attempts, including the first, made for a transport failure.
pub const RECONNECT_ATTEMPTS: u32 = 3;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RECONNECT_ATTEMPTS,
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

/// Retry executor with optional exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a new retry executor with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Calculate the delay before retry number `retry` (0-indexed).
    fn calculate_delay(&self, retry: u32) -> Duration {
        if self.config.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(retry as i32);
        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        Duration::from_millis(delay_ms as u64)
    }

    /// Execute an operation with retries.
    ///
    /// The closure receives the 1-based attempt number. The error of the
    /// last attempt is returned when every attempt fails.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> ConnectorResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_permanent() => {
                    debug!(attempt, error = %e, "Permanent failure, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(attempt, error = %e, "Transient failure, retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.calculate_delay(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
