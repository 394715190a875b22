//! Per-item exponential failure backoff
//!
//! Every failure of an item doubles its delay, starting at `base` and
//! capped at `max`. Forgetting an item resets its history.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

#[derive(Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure of `key` and return how long to wait before retrying
    pub fn when(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.to_string()).or_insert(0);
        let exp = *count;
        *count += 1;

        // 2^31 * 5ms is already far past any sane cap
        let factor = 1u32.checked_shl(exp.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.get(key).copied().unwrap_or(0)
    }

    pub fn forget(&self, key: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(key);
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_failure() {
        let limiter = ExponentialBackoff::default();

        assert_eq!(limiter.when("a"), Duration::from_millis(5));
        assert_eq!(limiter.when("a"), Duration::from_millis(10));
        assert_eq!(limiter.when("a"), Duration::from_millis(20));
        assert_eq!(limiter.num_requeues("a"), 3);

        // independent history per key
        assert_eq!(limiter.when("b"), Duration::from_millis(5));
    }

    #[test]
    fn test_backoff_capped() {
        let limiter = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        for _ in 0..40 {
            limiter.when("a");
        }
        assert_eq!(limiter.when("a"), Duration::from_secs(10));
    }

    #[test]
    fn test_forget_resets_history() {
        let limiter = ExponentialBackoff::default();
        limiter.when("a");
        limiter.when("a");

        limiter.forget("a");

        assert_eq!(limiter.num_requeues("a"), 0);
        assert_eq!(limiter.when("a"), Duration::from_millis(5));
    }
}
