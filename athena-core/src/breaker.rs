//! Circuit breaker guarding the connection pool and provider calls.
//!
//! States: `Closed` (normal) -> `Open` (failing fast) -> `HalfOpen` (single
//! probe). The circuit trips when the error rate over a sliding window
//! exceeds the configured threshold, not on a fixed consecutive-failure
//! count, so a burst of mixed traffic is judged proportionally.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Failing fast, requests rejected immediately
    Open,
    /// Testing recovery with a single probe
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Error rate in the window that opens the circuit
    pub error_rate_threshold: f64,
    /// Sliding window for the error rate
    pub window: Duration,
    /// Minimum calls in the window before the rate is judged
    pub min_calls: usize,
    /// Time in `Open` before allowing a half-open probe
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.5,
            window: Duration::from_secs(300),
            min_calls: 10,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of breaker counters
#[derive(Debug, Clone, Default)]
pub struct BreakerStats {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub opened_count: u32,
}

struct BreakerInner {
    state: CircuitState,
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    stats: BreakerStats,
}

/// Error-rate circuit breaker with a single half-open probe
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
                stats: BreakerStats::default(),
            }),
        }
    }

    /// Execute `operation` under breaker protection
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let is_probe = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                CircuitState::Closed => false,
                CircuitState::Open => {
                    let elapsed = inner
                        .opened_at
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::ZERO);
                    if elapsed >= self.config.open_timeout {
                        info!("Circuit breaker transitioning to half-open");
                        inner.state = CircuitState::HalfOpen;
                        inner.probe_in_flight = true;
                        true
                    } else {
                        inner.stats.rejected_calls += 1;
                        debug!("Circuit breaker rejecting request");
                        return Err(Error::CircuitBreakerOpen);
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        inner.stats.rejected_calls += 1;
                        return Err(Error::CircuitBreakerOpen);
                    }
                    inner.probe_in_flight = true;
                    true
                }
            }
        };

        let result = operation().await;
        self.record(&result, is_probe).await;
        result
    }

    async fn record<T>(&self, result: &Result<T>, was_probe: bool) {
        let mut inner = self.inner.lock().await;
        inner.stats.total_calls += 1;
        if was_probe {
            inner.probe_in_flight = false;
        }

        let failed = match result {
            Ok(_) => false,
            // Non-recoverable errors are caller mistakes, not backend health
            Err(e) => e.is_recoverable(),
        };
        if failed {
            inner.stats.failed_calls += 1;
        }

        let now = Instant::now();
        inner.outcomes.push_back((now, failed));
        let window = self.config.window;
        while let Some(&(t, _)) = inner.outcomes.front() {
            if now.duration_since(t) > window {
                inner.outcomes.pop_front();
            } else {
                break;
            }
        }

        match inner.state {
            CircuitState::Closed => {
                let total = inner.outcomes.len();
                if total >= self.config.min_calls {
                    let failures = inner.outcomes.iter().filter(|(_, f)| *f).count();
                    let rate = failures as f64 / total as f64;
                    if rate > self.config.error_rate_threshold {
                        warn!(
                            "Circuit breaker opening: error rate {:.0}% over {} calls",
                            rate * 100.0,
                            total
                        );
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(now);
                        inner.stats.opened_count += 1;
                    }
                }
            }
            CircuitState::HalfOpen => {
                if failed {
                    warn!("Circuit breaker reopening after failed probe");
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.stats.opened_count += 1;
                } else {
                    info!("Circuit breaker closing after successful probe");
                    inner.state = CircuitState::Closed;
                    inner.opened_at = None;
                    inner.outcomes.clear();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Current breaker state
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Counter snapshot
    pub async fn stats(&self) -> BreakerStats {
        self.inner.lock().await.stats.clone()
    }

    /// Force the breaker closed; for tests and manual intervention
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.outcomes.clear();
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip_config() -> BreakerConfig {
        BreakerConfig {
            error_rate_threshold: 0.5,
            window: Duration::from_secs(300),
            min_calls: 4,
            open_timeout: Duration::from_millis(50),
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call(|| async { Err::<(), _>(Error::Connection("down".into())) })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Ok(()) }).await;
    }

    #[tokio::test]
    async fn test_opens_on_error_rate() {
        let breaker = CircuitBreaker::new(trip_config());
        for _ in 0..4 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        let result = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::CircuitBreakerOpen)));
    }

    #[tokio::test]
    async fn test_stays_closed_below_min_calls() {
        let breaker = CircuitBreaker::new(trip_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new(trip_config());
        for _ in 0..4 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        succeed(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new(trip_config());
        for _ in 0..4 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_non_recoverable_errors_do_not_trip() {
        let breaker = CircuitBreaker::new(trip_config());
        for _ in 0..8 {
            let _ = breaker
                .call(|| async { Err::<(), _>(Error::InvalidInput("bad".into())) })
                .await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
