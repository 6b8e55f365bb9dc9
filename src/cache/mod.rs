//! Memoization of stage results
//!
//! A [`CacheKey`] identifies a call by the stage's source text and its resolved
//! arguments without the logger. Editing a stage body therefore invalidates its
//! entries even if the name and arguments are unchanged. The injected random
//! state is part of the key (through its seed), so the same logical arguments
//! under a different seed miss.
//!
//! # Example
//!
//! ```rust
//! use stagecraft::cache::{CacheStore, CachedResult, MemoryCache};
//! use stagecraft::logging::ResultLogs;
//! use stagecraft::cache::CacheKey;
//! use std::collections::BTreeMap;
//!
//! # fn example() -> stagecraft::Result<()> {
//! let cache = MemoryCache::new();
//! let key = CacheKey::from_parts("fn square(x) { x * x }", BTreeMap::new())?;
//! assert!(cache.lookup(&key).unwrap_err().is_cache_miss());
//!
//! cache.store(&key, CachedResult::new(serde_json::json!(4), ResultLogs::new()))?;
//! assert_eq!(cache.lookup(&key)?.value(), &serde_json::json!(4));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod memory;

pub use memory::MemoryCache;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::logging::ResultLogs;
use crate::stage::ResolvedArguments;
use crate::Result;

/// Default minimum execution time for a result to be stored.
pub const DEFAULT_CACHING_THRESHOLD: Duration = Duration::from_secs(2);

/// Identity of one stage call for memoization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    function: String,
    arguments: BTreeMap<String, Value>,
    digest: String,
}

impl CacheKey {
    /// Key for a call of the stage with `source` text.
    ///
    /// # Errors
    /// Returns error if the arguments cannot be encoded as JSON
    pub fn for_call(source: &str, arguments: &ResolvedArguments) -> Result<Self> {
        Self::from_parts(source, arguments.without_logger())
    }

    /// Key from source text and logger-free arguments.
    ///
    /// # Errors
    /// Returns error if the arguments cannot be encoded as JSON
    pub fn from_parts(source: &str, arguments: BTreeMap<String, Value>) -> Result<Self> {
        let function = source_digest(source);
        // Map keys are sorted, so the encoding is canonical
        let encoded = serde_json::to_vec(&(&function, &arguments))?;
        let digest = format!("{:x}", Sha256::digest(encoded));
        Ok(Self {
            function,
            arguments,
            digest,
        })
    }

    /// Digest of the stage source text.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Resolved arguments without the logger.
    #[must_use]
    pub const fn arguments(&self) -> &BTreeMap<String, Value> {
        &self.arguments
    }

    /// Stable hex digest of the whole key, suitable as a store key.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

/// SHA-256 hex digest of a stage's source text.
#[must_use]
pub fn source_digest(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

/// Stored outcome of a stage call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResult {
    value: Value,
    result_logs: ResultLogs,
}

impl CachedResult {
    /// Bundle a return value with the result-logs it emitted.
    #[must_use]
    pub const fn new(value: Value, result_logs: ResultLogs) -> Self {
        Self { value, result_logs }
    }

    /// Return value of the call.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Result-logs captured during the call.
    #[must_use]
    pub const fn result_logs(&self) -> &ResultLogs {
        &self.result_logs
    }

    /// Split into value and result-logs.
    #[must_use]
    pub fn into_parts(self) -> (Value, ResultLogs) {
        (self.value, self.result_logs)
    }
}

/// Key/value store for memoized stage results.
///
/// Implementations must treat a missing key as `Error::CacheMiss`; any other
/// error aborts the stage call.
pub trait CacheStore: Send + Sync {
    /// Fetch the entry for `key`.
    ///
    /// # Errors
    /// Returns `Error::CacheMiss` if there is no entry
    fn lookup(&self, key: &CacheKey) -> Result<CachedResult>;

    /// Store (or overwrite) the entry for `key`.
    ///
    /// # Errors
    /// Returns error if the backing store fails
    fn store(&self, key: &CacheKey, entry: CachedResult) -> Result<()>;
}

/// Per-stage memoization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    enabled: bool,
    threshold: Duration,
}

impl CachePolicy {
    /// Caching enabled with the given threshold.
    #[must_use]
    pub const fn new(threshold: Duration) -> Self {
        Self {
            enabled: true,
            threshold,
        }
    }

    /// Caching disabled.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            threshold: DEFAULT_CACHING_THRESHOLD,
        }
    }

    /// Whether lookups and stores happen at all.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Minimum execution time for a result to be stored.
    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Whether a call that took `elapsed` is worth storing.
    #[must_use]
    pub fn should_store(&self, elapsed: Duration) -> bool {
        self.enabled && elapsed > self.threshold
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CACHING_THRESHOLD)
    }
}
