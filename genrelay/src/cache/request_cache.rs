//! In-memory result cache with LRU eviction.

use super::stats::{CacheCounters, CacheStats};
use super::CacheConfig;
use crate::degradation::DegradationController;
use crate::fingerprint::RequestFingerprint;
use crate::request::GeneratedOutput;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A cached result as seen by callers.
///
/// Cloning is cheap; the payload is shared with the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: RequestFingerprint,
    pub output: GeneratedOutput,
    /// Size estimate charged against the byte budget
    pub size: usize,
    pub created_at: Instant,
    pub last_accessed: Instant,
}

/// Entry as stored. Recency is tracked with atomics so `get` only needs the
/// read lock.
#[derive(Debug)]
struct StoredEntry {
    output: GeneratedOutput,
    size: usize,
    created_at: Instant,
    /// Logical clock value of the last access, for LRU ordering
    access_tick: AtomicU64,
    /// Nanoseconds since the cache epoch of the last access
    last_access_ns: AtomicU64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<RequestFingerprint, StoredEntry>,
    total_bytes: usize,
}

/// Bounded cache of generation results keyed by request fingerprint.
///
/// Readers share a read lock and never block each other; `put` takes the
/// write lock and evicts synchronously, so both budgets hold whenever the
/// lock is released.
pub struct RequestCache {
    config: CacheConfig,
    inner: RwLock<Inner>,
    /// Monotonic access clock
    clock: AtomicU64,
    epoch: Instant,
    counters: CacheCounters,
    degradation: Option<Arc<DegradationController>>,
}

impl RequestCache {
    /// Create a new cache with the given budgets.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
            clock: AtomicU64::new(0),
            epoch: Instant::now(),
            counters: CacheCounters::default(),
            degradation: None,
        }
    }

    /// Couples writes and budgets to the pressure level.
    pub fn with_degradation(mut self, controller: Arc<DegradationController>) -> Self {
        self.degradation = Some(controller);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a cached result.
    ///
    /// Refreshes recency on a hit. Entries past `max_age` are misses.
    pub fn get(&self, fingerprint: &RequestFingerprint) -> Option<CacheEntry> {
        let inner = self.inner.read();

        let Some(entry) = inner.entries.get(fingerprint) else {
            CacheCounters::bump(&self.counters.misses, 1);
            return None;
        };

        if self.is_expired(entry) {
            CacheCounters::bump(&self.counters.misses, 1);
            return None;
        }

        let now = Instant::now();
        entry.access_tick.store(self.tick(), Ordering::Relaxed);
        entry
            .last_access_ns
            .store(self.nanos_since_epoch(now), Ordering::Relaxed);
        CacheCounters::bump(&self.counters.hits, 1);

        Some(CacheEntry {
            fingerprint: *fingerprint,
            output: entry.output.clone(),
            size: entry.size,
            created_at: entry.created_at,
            last_accessed: now,
        })
    }

    /// Store a result.
    ///
    /// Returns false if the write was refused: caching is disabled by the
    /// pressure level, or `size` alone exceeds the current byte budget.
    /// Re-inserting a fingerprint replaces the previous entry.
    pub fn put(&self, fingerprint: RequestFingerprint, output: GeneratedOutput, size: usize) -> bool {
        if !self.caching_enabled() {
            CacheCounters::bump(&self.counters.rejected_writes, 1);
            debug!(fingerprint = %fingerprint.short(), "Cache write skipped under pressure");
            return false;
        }

        let (max_entries, max_bytes) = self.effective_budget();
        if max_entries == 0 || size > max_bytes {
            CacheCounters::bump(&self.counters.rejected_writes, 1);
            debug!(
                fingerprint = %fingerprint.short(),
                size,
                max_bytes,
                "Cache write skipped, entry exceeds budget"
            );
            return false;
        }

        let mut inner = self.inner.write();
        self.purge_expired_locked(&mut inner);

        let now = Instant::now();
        let entry = StoredEntry {
            output,
            size,
            created_at: now,
            access_tick: AtomicU64::new(self.tick()),
            last_access_ns: AtomicU64::new(self.nanos_since_epoch(now)),
        };

        if let Some(previous) = inner.entries.insert(fingerprint, entry) {
            inner.total_bytes -= previous.size;
        }
        inner.total_bytes += size;
        CacheCounters::bump(&self.counters.insertions, 1);

        self.evict_lru_locked(&mut inner, max_entries, max_bytes, Some(&fingerprint));
        true
    }

    /// Remove every entry.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    /// Remove entries past `max_age`. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.write();
        self.purge_expired_locked(&mut inner)
    }

    /// Evict until the current (possibly pressure-reduced) budget holds.
    ///
    /// `put` already does this; call it after a pressure increase to shrink
    /// the cache without waiting for the next write.
    pub fn enforce_budget(&self) -> usize {
        let (max_entries, max_bytes) = self.effective_budget();
        let mut inner = self.inner.write();
        self.evict_lru_locked(&mut inner, max_entries, max_bytes, None)
    }

    /// Check if a fingerprint has a live entry. Does not refresh recency.
    pub fn contains(&self, fingerprint: &RequestFingerprint) -> bool {
        let inner = self.inner.read();
        inner
            .entries
            .get(fingerprint)
            .is_some_and(|entry| !self.is_expired(entry))
    }

    /// Returns a live entry's output without counting a hit or refreshing
    /// recency.
    pub fn peek(&self, fingerprint: &RequestFingerprint) -> Option<GeneratedOutput> {
        let inner = self.inner.read();
        inner
            .entries
            .get(fingerprint)
            .filter(|entry| !self.is_expired(entry))
            .map(|entry| entry.output.clone())
    }

    pub fn entry_count(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.read().total_bytes
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        self.counters.snapshot(inner.entries.len(), inner.total_bytes)
    }

    /// Entry and byte budgets after pressure scaling.
    pub fn effective_budget(&self) -> (usize, usize) {
        let percent = self
            .degradation
            .as_ref()
            .map_or(100, |controller| controller.cache_budget_percent());
        if percent >= 100 {
            return (self.config.max_entries, self.config.max_size_bytes);
        }
        (
            scale(self.config.max_entries, percent),
            scale(self.config.max_size_bytes, percent),
        )
    }

    /// Last access time of an entry, without refreshing it.
    pub fn last_access(&self, fingerprint: &RequestFingerprint) -> Option<Instant> {
        let inner = self.inner.read();
        inner.entries.get(fingerprint).map(|entry| {
            self.epoch + Duration::from_nanos(entry.last_access_ns.load(Ordering::Relaxed))
        })
    }

    fn caching_enabled(&self) -> bool {
        self.degradation
            .as_ref()
            .map_or(true, |controller| controller.caching_enabled())
    }

    fn is_expired(&self, entry: &StoredEntry) -> bool {
        self.config
            .max_age
            .is_some_and(|max_age| entry.created_at.elapsed() >= max_age)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn nanos_since_epoch(&self, now: Instant) -> u64 {
        now.duration_since(self.epoch)
            .as_nanos()
            .min(u64::MAX as u128) as u64
    }

    fn purge_expired_locked(&self, inner: &mut Inner) -> usize {
        if self.config.max_age.is_none() {
            return 0;
        }

        let expired: Vec<RequestFingerprint> = inner
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(fingerprint, _)| *fingerprint)
            .collect();

        for fingerprint in &expired {
            if let Some(entry) = inner.entries.remove(fingerprint) {
                inner.total_bytes -= entry.size;
            }
        }

        if !expired.is_empty() {
            CacheCounters::bump(&self.counters.expirations, expired.len() as u64);
            debug!(count = expired.len(), "Purged expired cache entries");
        }
        expired.len()
    }

    /// Evict least recently used entries until both budgets hold.
    fn evict_lru_locked(
        &self,
        inner: &mut Inner,
        max_entries: usize,
        max_bytes: usize,
        keep: Option<&RequestFingerprint>,
    ) -> usize {
        if inner.entries.len() <= max_entries && inner.total_bytes <= max_bytes {
            return 0;
        }

        // Oldest access first
        let mut candidates: Vec<(RequestFingerprint, u64)> = inner
            .entries
            .iter()
            .filter(|(fingerprint, _)| Some(*fingerprint) != keep)
            .map(|(fingerprint, entry)| (*fingerprint, entry.access_tick.load(Ordering::Relaxed)))
            .collect();
        candidates.sort_unstable_by_key(|(_, tick)| *tick);

        let mut evicted = 0;
        for (fingerprint, _) in candidates {
            if inner.entries.len() <= max_entries && inner.total_bytes <= max_bytes {
                break;
            }
            if let Some(entry) = inner.entries.remove(&fingerprint) {
                inner.total_bytes -= entry.size;
                evicted += 1;
            }
        }

        CacheCounters::bump(&self.counters.evictions, evicted as u64);
        debug!(
            evicted,
            entries = inner.entries.len(),
            bytes = inner.total_bytes,
            "Cache eviction"
        );
        evicted
    }
}

fn scale(value: usize, percent: u8) -> usize {
    (value as u128 * percent as u128 / 100) as usize
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
