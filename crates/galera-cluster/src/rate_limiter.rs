//! Per-key exponential backoff for the work queue.
//!
//! Every failed attempt for a key doubles the delay before that key is
//! handed out again, up to a cap. A successful pass calls `forget`, which
//! resets the key to the base delay.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;

/// Backoff bounds for re-enqueued keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Delay applied to the first re-enqueue of a key
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

impl RateLimiterConfig {
    /// Create a config with explicit bounds
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }
}

/// Exponential per-item backoff: `base * 2^failures`, capped at `max`.
pub struct ItemExponentialBackoff<K> {
    config: RateLimiterConfig,
    failures: DashMap<K, u32>,
}

impl<K> std::fmt::Debug for ItemExponentialBackoff<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemExponentialBackoff")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<K: Eq + Hash + Clone> ItemExponentialBackoff<K> {
    /// Create a limiter with the given bounds
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Delay before `key` may be processed again; records one more failure.
    pub fn when(&self, key: &K) -> Duration {
        let exponent = {
            let mut count = self.failures.entry(key.clone()).or_insert(0);
            let exponent = *count;
            *count = count.saturating_add(1);
            exponent
        };

        // 2^31 * any sane base already exceeds every realistic cap
        let factor = 2u32.checked_pow(exponent.min(31)).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .checked_mul(factor)
            .map_or(self.config.max_delay, |d| d.min(self.config.max_delay))
    }

    /// Number of failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).map_or(0, |count| *count)
    }

    /// Reset `key` to the base delay
    pub fn forget(&self, key: &K) {
        self.failures.remove(key);
    }
}
