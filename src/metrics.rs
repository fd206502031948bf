//! Cache-wide operation counters.
//!
//! A single [`CacheMetrics`] instance is shared by every shard; counters
//! are relaxed atomics, observational only, and never influence policy
//! decisions. [`MetricsSnapshot`] is the cheap `Copy` view handed to
//! callers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counters, incremented under the shard locks.
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    #[inline]
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the cache counters.
///
/// `evictions` counts policy evictions only: resident entries swept from
/// the cold ring into the test list. Explicit `delete`/`evict_file`
/// removals are not counted.
///
/// # Example
///
/// ```
/// use blockcache::{Cache, FileId, Value};
///
/// let cache = Cache::new(1024, 1);
/// cache.set(FileId(1), 0, Value::from_slice(b"a")).release();
/// cache.get(FileId(1), 0).release();
/// cache.get(FileId(1), 99).release();
///
/// let metrics = cache.metrics();
/// assert_eq!(metrics.hits, 1);
/// assert_eq!(metrics.misses, 1);
/// assert_eq!(metrics.insertions, 1);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}
