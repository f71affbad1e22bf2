//! Call-site retry with exponential backoff
//!
//! Transient collaborator failures are retried here, at the call site.
//! The build monitor's retry budget is a separate concept and is never
//! consumed by these retries.

use crate::error::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum attempts
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Policy that never waits; used by tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::ZERO)
            .with_max_delay(Duration::ZERO)
            .with_jitter(false)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = base_ms.min(self.max_delay.as_millis() as f64) as u64;
        let jitter_ms = if self.jitter { jitter(delay_ms / 4) } else { 0 };
        Duration::from_millis(delay_ms + jitter_ms)
    }
}

fn jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    nanos % max
}

/// Error returned when every attempt failed
#[derive(Debug)]
pub struct RetryError<E> {
    /// The last error encountered
    pub last_error: E,
    /// Total number of attempts made
    pub attempts: u32,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed after {} attempts: {}", self.attempts, self.last_error)
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget runs out.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = config.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = ?e,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(attempt, error = ?e, "Giving up");
                return Err(RetryError {
                    last_error: e,
                    attempts: attempt,
                });
            }
        }
    }
}

/// [`retry_with_backoff`] for core operations: retries transient errors
/// and returns the last error unchanged.
pub async fn call_with_backoff<T, F, Fut>(config: &RetryConfig, operation: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    retry_with_backoff(config, operation, Error::is_transient)
        .await
        .map_err(|e| e.last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(250))
            .with_jitter(false);
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(5), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = call_with_backoff(&RetryConfig::immediate(3), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::unavailable("builds", "503"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: crate::Result<()> = call_with_backoff(&RetryConfig::immediate(5), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::rejected("builds", "400")) }
        })
        .await;
        assert!(matches!(result, Err(Error::Collaborator { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let result: Result<(), RetryError<&str>> =
            retry_with_backoff(&RetryConfig::immediate(4), || async { Err("down") }, |_| true)
                .await;
        assert_eq!(result.unwrap_err().attempts, 4);
    }
}
