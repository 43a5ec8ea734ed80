//! Cache configuration.

use std::time::Duration;

/// Default maximum number of cached results.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1024;

/// Default cache byte budget (64 MB).
pub const DEFAULT_CACHE_MAX_BYTES: usize = 64 * 1024 * 1024;

/// Budgets for the request cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Maximum total size estimate in bytes.
    pub max_size_bytes: usize,
    /// Entries older than this are treated as misses. `None` keeps entries
    /// until evicted.
    pub max_age: Option<Duration>,
}

impl CacheConfig {
    pub fn new(max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            max_entries,
            max_size_bytes,
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_MAX_BYTES)
    }
}
