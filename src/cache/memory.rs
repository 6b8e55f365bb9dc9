//! In-memory cache store using `DashMap`.
//!
//! This is the default backend - entries are lost on process restart.

use dashmap::DashMap;

use super::{CacheKey, CacheStore, CachedResult};
use crate::{Error, Result};

/// In-memory memoization store keyed by [`CacheKey::digest`].
///
/// Thread-safe; one instance can be shared by several experiments.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use stagecraft::cache::MemoryCache;
/// use stagecraft::Experiment;
///
/// let cache = Arc::new(MemoryCache::new());
/// let experiment = Experiment::builder("demo").seed(1).cache(cache.clone()).build();
/// assert!(experiment.is_ok());
/// assert!(cache.is_empty());
/// ```
#[derive(Debug)]
pub struct MemoryCache {
    store: DashMap<String, CachedResult>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    /// Create with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: DashMap::with_capacity(capacity),
        }
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether an entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.store.contains_key(key.digest())
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCache {
    fn lookup(&self, key: &CacheKey) -> Result<CachedResult> {
        self.store
            .get(key.digest())
            .map(|entry| entry.value().clone())
            .ok_or(Error::CacheMiss)
    }

    fn store(&self, key: &CacheKey, entry: CachedResult) -> Result<()> {
        self.store.insert(key.digest().to_string(), entry);
        Ok(())
    }
}
