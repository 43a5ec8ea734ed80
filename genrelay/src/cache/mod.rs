//! Result cache for completed generation requests.
//!
//! Bounded in both entry count and total size estimate, with LRU eviction
//! and optional expiry. Cache writes follow the degradation controller:
//! disabled under Critical pressure and held to a reduced budget under
//! Elevated pressure.

mod config;
mod request_cache;
mod stats;

pub use config::{CacheConfig, DEFAULT_CACHE_MAX_BYTES, DEFAULT_CACHE_MAX_ENTRIES};
pub use request_cache::{CacheEntry, RequestCache};
pub use stats::CacheStats;
