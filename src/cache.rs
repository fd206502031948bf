//! Sharded cache façade: routing, reservations, and aggregate size.
//!
//! The [`Cache`] splits its byte capacity evenly across independently
//! locked shards; a 64-bit mix of `(file, offset)` picks
//! the shard, so concurrency scales with the shard count and operations
//! within a shard serialize on its mutex. Nothing blocks except that
//! mutex: reads through returned [`Handle`]s are lock-free.
//!
//! ```text
//!   set / get / delete ──► mix64(offset ^ rotl(file, 17)) ──► shard k
//!   evict_file         ──► every shard (a file's blocks span shards)
//!   reserve            ──► ceil(n / shards) carved out of every shard
//!   size               ──► sum of per-shard sizes (best-effort snapshot)
//! ```
//!
//! Ordering guarantees are per key: a `set` that returned happens-before
//! a later `get` observing the value, concurrent `set`s on one key are
//! resolved by lock order (last locker wins, the loser's value is
//! released immediately), and `size()` makes no cross-shard promise.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::{BlockKey, FileId};
use crate::handle::Handle;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::shard::Shard;
use crate::value::Value;

/// SplitMix64 finalizer. Adjacent offsets (the common case in sequential
/// scans) must land on different shards, so the raw key bits are run
/// through a full-avalanche mix.
#[inline]
pub(crate) fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// A fixed-capacity, sharded CLOCK-Pro cache of `(file, offset)`-addressed
/// blocks.
///
/// Values are admitted by [`set`](Cache::set), retained or evicted by the
/// per-shard adaptive policy, and read through refcounted [`Handle`]s that
/// stay valid across eviction. Dropping the cache drains every shard;
/// outstanding handles keep their payloads alive.
///
/// # Example
///
/// ```
/// use blockcache::{Cache, FileId, Value};
///
/// let cache = Cache::new(64 << 10, 4);
/// cache.set(FileId(3), 4096, Value::from_slice(b"block")).release();
///
/// let handle = cache.get(FileId(3), 4096);
/// assert_eq!(handle.get(), Some(&b"block"[..]));
/// handle.release();
///
/// cache.evict_file(FileId(3));
/// assert!(cache.get(FileId(3), 4096).is_empty());
/// ```
#[derive(Debug)]
pub struct Cache {
    shards: Box<[Mutex<Shard>]>,
    metrics: Arc<CacheMetrics>,
    capacity: usize,
}

impl Cache {
    /// Creates a cache of `capacity_bytes` split across `shard_count`
    /// shards. A shard count of zero is clamped to one; the last shard
    /// absorbs the division remainder.
    ///
    /// A zero-byte cache is valid: every `set` is accepted and every
    /// `get` misses.
    pub fn new(capacity_bytes: usize, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let base = capacity_bytes / shard_count;
        let metrics = Arc::new(CacheMetrics::default());
        let shards: Vec<_> = (0..shard_count)
            .map(|i| {
                let capacity = if i + 1 == shard_count {
                    capacity_bytes - base * (shard_count - 1)
                } else {
                    base
                };
                Mutex::new(Shard::new(capacity, Arc::clone(&metrics)))
            })
            .collect();
        Self {
            shards: shards.into_boxed_slice(),
            metrics,
            capacity: capacity_bytes,
        }
    }

    #[inline]
    fn shard_for(&self, key: &BlockKey) -> &Mutex<Shard> {
        let hash = mix64(key.offset ^ key.file.0.rotate_left(17));
        &self.shards[(hash % self.shards.len() as u64) as usize]
    }

    /// Looks up the block at `(file, offset)`. A hit marks the entry
    /// referenced and returns a handle owning one reference; a miss (or a
    /// ghost hit) returns the empty handle.
    pub fn get(&self, file: FileId, offset: u64) -> Handle {
        let key = BlockKey { file, offset };
        self.shard_for(&key).lock().get(key)
    }

    /// Inserts `value` under `(file, offset)`, consuming it, and returns a
    /// handle to it.
    ///
    /// A zero-length value is never cached and yields the empty handle.
    /// The returned handle is valid even when the value was not retained
    /// (zero capacity, or a payload larger than the shard target).
    pub fn set(&self, file: FileId, offset: u64, value: Value) -> Handle {
        if value.is_empty() {
            return Handle::empty();
        }
        let key = BlockKey { file, offset };
        self.shard_for(&key).lock().set(key, Arc::new(value))
    }

    /// Removes the entry at `(file, offset)`, resident or ghost. A no-op
    /// for absent keys.
    pub fn delete(&self, file: FileId, offset: u64) {
        let key = BlockKey { file, offset };
        self.shard_for(&key).lock().delete(key);
    }

    /// Removes every entry belonging to `file`, resident or ghost, in
    /// time proportional to the file's entry count. A no-op for unknown
    /// files.
    pub fn evict_file(&self, file: FileId) {
        for shard in self.shards.iter() {
            shard.lock().evict_file(file);
        }
    }

    /// Carves `n` bytes out of the cache capacity until the returned
    /// guard is released, evicting as needed. The carve-out is split as
    /// `ceil(n / shard_count)` per shard, so it may round up slightly.
    ///
    /// `n` larger than the capacity is permitted; the cache simply holds
    /// nothing until release.
    pub fn reserve(&self, n: usize) -> Reservation<'_> {
        let per_shard = n.div_ceil(self.shards.len());
        for shard in self.shards.iter() {
            shard.lock().reserve(per_shard);
        }
        Reservation {
            cache: self,
            per_shard,
            released: false,
        }
    }

    /// Total resident bytes. A best-effort snapshot: each shard is read
    /// under its own lock, with no cross-shard consistency.
    pub fn size(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().size()).sum()
    }

    /// Configured capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of shards.
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Snapshot of the hit/miss/insertion/eviction counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn debug_validate_invariants(&self) {
        for shard in self.shards.iter() {
            shard.lock().debug_validate_invariants();
        }
    }
}

/// Capacity carve-out returned by [`Cache::reserve`].
///
/// Holds `n` bytes out of the cache until [`release`](Reservation::release)
/// is called or the guard is dropped. Releasing twice is a programmer
/// error and panics.
///
/// # Example
///
/// ```
/// use blockcache::{Cache, FileId, Value};
///
/// let cache = Cache::new(100, 1);
/// cache.set(FileId(1), 0, Value::from_slice(b"aaaaa")).release();
///
/// let mut reservation = cache.reserve(100);
/// assert_eq!(cache.size(), 0);
///
/// reservation.release();
/// cache.set(FileId(1), 0, Value::from_slice(b"aaaaa")).release();
/// assert_eq!(cache.size(), 5);
/// ```
pub struct Reservation<'a> {
    cache: &'a Cache,
    per_shard: usize,
    released: bool,
}

impl Reservation<'_> {
    /// Returns the reserved capacity to the cache.
    ///
    /// # Panics
    ///
    /// Panics if the reservation was already released.
    pub fn release(&mut self) {
        if self.released {
            panic!("blockcache: cache reservation already released");
        }
        self.release_now();
    }

    fn release_now(&mut self) {
        self.released = true;
        for shard in self.cache.shards.iter() {
            shard.lock().unreserve(self.per_shard);
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.release_now();
        }
    }
}
