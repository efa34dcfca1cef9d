//! Key-value cache capability.
//!
//! Used for failed-login counters and password reset codes. Values are
//! strings; every entry may carry its own time to live.

use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{ConfigError, Params};
use crate::error::ErrorKind;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache server could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// `incr` was called on a value that is not an integer.
    #[error("cache value for {key} is not a counter")]
    NotACounter { key: String },
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::Unavailable(_) => ErrorKind::BackendUnavailable,
            CacheError::NotACounter { .. } => ErrorKind::Internal,
        }
    }
}

/// Operation contract of the key-value cache capability.
pub trait KeyValueCache: Send + Sync {
    /// Implementation identifier.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores `value`, replacing any previous value and its expiry.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Removes the key. Returns whether it existed.
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Increments a counter and returns the new value.
    ///
    /// A missing counter starts at 1 and expires after `ttl`; an existing
    /// counter keeps its original expiry.
    fn incr(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    ttl: Option<Duration>,
    // false for counter increments, which keep the remaining lifetime
    reset_ttl: bool,
}

struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        if value.reset_ttl {
            value.ttl
        } else {
            duration_until_expiry
        }
    }
}

/// In-process cache backed by `moka`.
pub struct MemoryCache {
    cache: Cache<String, CacheEntry>,
    counters: Mutex<()>,
}

impl MemoryCache {
    pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build();
        Self {
            cache,
            counters: Mutex::new(()),
        }
    }

    /// Builds the cache from its `cache` section (`max_entries`).
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let max_entries = params.get_typed_or("max_entries", Self::DEFAULT_MAX_ENTRIES)?;
        tracing::debug!(target: "sync_core::registry", max_entries, "memory cache configured");
        Ok(Self::new(max_entries))
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}

impl KeyValueCache for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.cache.get(key).map(|entry| entry.value))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.cache.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                ttl,
                reset_ttl: true,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.cache.remove(key).is_some())
    }

    fn incr(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64> {
        let _guard = self.counters.lock();
        let entry = match self.cache.get(key) {
            Some(existing) => {
                let current: i64 = existing.value.parse().map_err(|_| CacheError::NotACounter {
                    key: key.to_string(),
                })?;
                CacheEntry {
                    value: (current + 1).to_string(),
                    ttl: existing.ttl,
                    reset_ttl: false,
                }
            }
            None => CacheEntry {
                value: "1".to_string(),
                ttl,
                reset_ttl: true,
            },
        };
        let next = entry.value.parse().unwrap_or(1);
        self.cache.insert(key.to_string(), entry);
        Ok(next)
    }
}

/// Cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl KeyValueCache for NullCache {
    fn name(&self) -> &'static str {
        "null"
    }

    fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> CacheResult<bool> {
        Ok(false)
    }

    fn incr(&self, _key: &str, _ttl: Option<Duration>) -> CacheResult<i64> {
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_roundtrip() {
        let cache = MemoryCache::default();
        cache.set("k", "v", None).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v"));
        assert!(cache.delete("k").unwrap());
        assert!(!cache.delete("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn entries_expire() {
        let cache = MemoryCache::default();
        cache.set("short", "v", Some(Duration::from_millis(50))).unwrap();
        cache.set("long", "v", None).unwrap();
        std::thread::sleep(Duration::from_millis(150));

        assert_eq!(cache.get("short").unwrap(), None);
        assert!(cache.get("long").unwrap().is_some());
    }

    #[test]
    fn counters_increment_and_keep_expiry() {
        let cache = MemoryCache::default();
        assert_eq!(cache.incr("fails:bob", Some(Duration::from_millis(100))).unwrap(), 1);
        assert_eq!(cache.incr("fails:bob", Some(Duration::from_secs(60))).unwrap(), 2);
        assert_eq!(cache.incr("fails:bob", None).unwrap(), 3);
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(cache.get("fails:bob").unwrap(), None);
        assert_eq!(cache.incr("fails:bob", None).unwrap(), 1);
    }

    #[test]
    fn incr_rejects_non_counters() {
        let cache = MemoryCache::default();
        cache.set("name", "alice", None).unwrap();
        let err = cache.incr("name", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let cache = MemoryCache::default();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..25 {
                        cache.incr("hits", None).unwrap();
                    }
                });
            }
        });
        assert_eq!(cache.get("hits").unwrap().as_deref(), Some("200"));
    }

    #[test]
    fn null_cache_stores_nothing() {
        let cache = NullCache;
        cache.set("k", "v", None).unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
        assert_eq!(cache.incr("k", None).unwrap(), 1);
        assert_eq!(cache.incr("k", None).unwrap(), 1);
    }
}
