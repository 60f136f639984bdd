//! Keyed rate limiting for repeated diagnostics.
//!
//! Problems such as a version mismatch or an unknown source id repeat for
//! every packet a misbehaving peer sends. [`KeyedRateLimiter`] lets one
//! message per key through per interval, or once for the limiter's lifetime
//! when no interval is set, and counts what it held back.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Window {
    opened: Instant,
    suppressed: u64,
}

/// Rate limiting metrics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RateLimitMetrics {
    /// Messages let through
    pub allowed: u64,
    /// Messages held back
    pub suppressed: u64,
}

/// Lets one event per key through per interval
#[derive(Debug)]
pub struct KeyedRateLimiter<K> {
    interval: Option<Duration>,
    windows: HashMap<K, Window>,
    metrics: RateLimitMetrics,
}

impl<K: Hash + Eq> KeyedRateLimiter<K> {
    /// One event per key per `interval`
    #[must_use]
    pub fn per_interval(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            windows: HashMap::new(),
            metrics: RateLimitMetrics::default(),
        }
    }

    /// One event per key until [`clear`](Self::clear)
    #[must_use]
    pub fn once_per_key() -> Self {
        Self {
            interval: None,
            windows: HashMap::new(),
            metrics: RateLimitMetrics::default(),
        }
    }

    /// Check an event for `key` at `now`.
    ///
    /// Returns `Some(n)` when the event may be reported, `n` being how many
    /// were suppressed for this key since the last report, and `None` when it
    /// should be dropped.
    pub fn check(&mut self, key: K, now: Instant) -> Option<u64> {
        match self.windows.get_mut(&key) {
            Some(window) => {
                let expired = self
                    .interval
                    .is_some_and(|interval| now.saturating_duration_since(window.opened) >= interval);
                if expired {
                    let suppressed = window.suppressed;
                    window.opened = now;
                    window.suppressed = 0;
                    self.metrics.allowed += 1;
                    Some(suppressed)
                } else {
                    window.suppressed += 1;
                    self.metrics.suppressed += 1;
                    None
                }
            }
            None => {
                self.windows.insert(
                    key,
                    Window {
                        opened: now,
                        suppressed: 0,
                    },
                );
                self.metrics.allowed += 1;
                Some(0)
            }
        }
    }

    /// Forget every key
    pub fn clear(&mut self) {
        self.windows.clear();
    }

    /// Number of keys being tracked
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Counters since creation
    #[must_use]
    pub fn metrics(&self) -> &RateLimitMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_per_key() {
        let mut limiter = KeyedRateLimiter::once_per_key();
        let now = Instant::now();
        assert_eq!(limiter.check(("a", 1), now), Some(0));
        assert_eq!(limiter.check(("a", 1), now + Duration::from_secs(3600)), None);
        assert_eq!(limiter.check(("a", 2), now), Some(0));
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.clear();
        assert_eq!(limiter.check(("a", 1), now), Some(0));
    }

    #[test]
    fn test_interval_window() {
        let mut limiter = KeyedRateLimiter::per_interval(Duration::from_secs(5));
        let start = Instant::now();
        assert_eq!(limiter.check(7u16, start), Some(0));
        assert_eq!(limiter.check(7, start + Duration::from_secs(1)), None);
        assert_eq!(limiter.check(7, start + Duration::from_secs(2)), None);
        assert_eq!(limiter.check(7, start + Duration::from_secs(5)), Some(2));
        assert_eq!(limiter.check(7, start + Duration::from_secs(6)), None);

        assert_eq!(
            limiter.metrics(),
            &RateLimitMetrics {
                allowed: 2,
                suppressed: 3
            }
        );
    }
}
