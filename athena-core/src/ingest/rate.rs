//! Per-source token-bucket rate limiting.

use std::time::{Duration, Instant};

/// Token bucket refilled continuously at a fixed rate.
///
/// The limit is soft: callers observe `try_acquire` and back off, nothing is
/// dropped on the floor.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket allowing `events_per_min` sustained, bursting to the same
    #[must_use]
    pub fn per_minute(events_per_min: u32) -> Self {
        let capacity = f64::from(events_per_min.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Try to take `n` tokens; returns false when the bucket is empty
    pub fn try_acquire(&mut self, n: usize) -> bool {
        self.try_acquire_at(n, Instant::now())
    }

    /// Clock-injected variant for tests
    pub fn try_acquire_at(&mut self, n: usize, now: Instant) -> bool {
        self.refill(now);
        let needed = n as f64;
        if self.tokens >= needed {
            self.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Time until `n` tokens will be available
    pub fn wait_for(&mut self, n: usize) -> Duration {
        self.refill(Instant::now());
        let deficit = (n as f64 - self.tokens).max(0.0);
        Duration::from_secs_f64(deficit / self.refill_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_allows_burst_up_to_capacity() {
        let mut bucket = TokenBucket::per_minute(100);
        assert!(bucket.try_acquire(100));
        assert!(!bucket.try_acquire(1));
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let mut bucket = TokenBucket::per_minute(60);
        let start = Instant::now();
        assert!(bucket.try_acquire_at(60, start));
        assert!(!bucket.try_acquire_at(1, start));
        // One token per second at 60/min
        assert!(bucket.try_acquire_at(2, start + Duration::from_secs(2)));
    }

    #[test]
    fn test_wait_for_reports_deficit() {
        let mut bucket = TokenBucket::per_minute(60);
        assert!(bucket.try_acquire(60));
        let wait = bucket.wait_for(30);
        assert!(wait > Duration::from_secs(25) && wait <= Duration::from_secs(31));
    }
}
