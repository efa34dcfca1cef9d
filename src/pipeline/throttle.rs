//! Failed-login throttling on top of the key-value cache.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheResult, KeyValueCache};

/// Counts failed verifications per identifier.
///
/// After `max_failures` failures inside `window` the identifier is locked
/// until the counter expires.
pub struct Throttle {
    cache: Arc<dyn KeyValueCache>,
    max_failures: u32,
    window: Duration,
}

impl Throttle {
    pub fn new(cache: Arc<dyn KeyValueCache>, max_failures: u32, window: Duration) -> Self {
        Self {
            cache,
            max_failures,
            window,
        }
    }

    fn key(identifier: &str) -> String {
        format!("authfail:{identifier}")
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn is_locked(&self, identifier: &str) -> CacheResult<bool> {
        let count = self
            .cache
            .get(&Self::key(identifier))?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(count >= i64::from(self.max_failures))
    }

    /// Records a failure; returns `true` when this failure locks the identifier.
    pub fn record_failure(&self, identifier: &str) -> CacheResult<bool> {
        let count = self.cache.incr(&Self::key(identifier), Some(self.window))?;
        Ok(count >= i64::from(self.max_failures))
    }

    pub fn reset(&self, identifier: &str) -> CacheResult<()> {
        self.cache.delete(&Self::key(identifier)).map(|_| ())
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("cache", &self.cache.name())
            .field("max_failures", &self.max_failures)
            .field("window", &self.window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn throttle(max: u32) -> Throttle {
        Throttle::new(Arc::new(MemoryCache::default()), max, Duration::from_secs(60))
    }

    #[test]
    fn locks_after_max_failures() {
        let throttle = throttle(3);
        assert!(!throttle.is_locked("alice").unwrap());
        assert!(!throttle.record_failure("alice").unwrap());
        assert!(!throttle.record_failure("alice").unwrap());
        assert!(throttle.record_failure("alice").unwrap());
        assert!(throttle.is_locked("alice").unwrap());
        assert!(!throttle.is_locked("bob").unwrap());
    }

    #[test]
    fn reset_unlocks() {
        let throttle = throttle(1);
        throttle.record_failure("alice").unwrap();
        assert!(throttle.is_locked("alice").unwrap());
        throttle.reset("alice").unwrap();
        assert!(!throttle.is_locked("alice").unwrap());
    }
}
