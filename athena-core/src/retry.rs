//! Shared retry policy with exponential backoff.
//!
//! Retries are driven by [`Error::is_recoverable`](crate::error::Error):
//! transient infrastructure failures back off and retry, validation and
//! integrity failures surface immediately.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Ingestion preset: `min(1000 * 2^n, 10000)` ms, three attempts
    #[must_use]
    pub fn ingestion() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            jitter_factor: 0.0,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Executes operations under the retry policy
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.config.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = std::cmp::min(exp, self.config.max_delay);

        if self.config.jitter_factor > 0.0 {
            let jitter_range = delay.as_millis() as f64 * self.config.jitter_factor;
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            let adjusted = (delay.as_millis() as f64 + jitter).max(0.0);
            Duration::from_millis(adjusted as u64)
        } else {
            delay
        }
    }

    /// Run `operation`, retrying recoverable failures up to the configured
    /// limit. Non-recoverable errors return on the first attempt.
    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_recoverable() || attempt >= self.config.max_retries {
                        return Err(e);
                    }

                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Retry attempt {}/{} after recoverable error: {e} (next in {delay:?})",
                        attempt, self.config.max_retries
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Classify an arbitrary error message from the driver layer into the
/// transient bucket when it matches known connection failure shapes
#[must_use]
pub fn classify_driver_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        Error::Timeout(message.to_string())
    } else if lower.contains("connection") || lower.contains("connect") || lower.contains("busy") {
        Error::Connection(message.to_string())
    } else {
        Error::Storage(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_error_is_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let policy = RetryPolicy::new(RetryConfig::default().without_jitter());
        let result = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Connection("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_error_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let policy = RetryPolicy::new(RetryConfig::default().without_jitter());
        let result: Result<()> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::InvalidInput("bad".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error() {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_max_retries(2)
                .without_jitter(),
        );
        let result: Result<()> = policy
            .execute(|| async { Err(Error::Timeout("always".into())) })
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_ingestion_backoff_schedule() {
        let policy = RetryPolicy::new(RetryConfig::ingestion());
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(10_000));
    }

    #[test]
    fn test_classify_driver_error() {
        assert!(matches!(
            classify_driver_error("connection refused"),
            Error::Connection(_)
        ));
        assert!(matches!(
            classify_driver_error("statement timed out"),
            Error::Timeout(_)
        ));
        assert!(matches!(
            classify_driver_error("constraint violated"),
            Error::Storage(_)
        ));
    }
}
