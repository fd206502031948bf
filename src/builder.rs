//! Cache configuration builder.
//!
//! Wraps [`Cache::new`] with a defaulted shard count and a fallible
//! variant for caller-supplied configuration.
//!
//! ## Example
//!
//! ```
//! use blockcache::CacheBuilder;
//!
//! let cache = CacheBuilder::new(32 << 20).shards(8).build();
//! assert_eq!(cache.capacity(), 32 << 20);
//! assert_eq!(cache.shard_count(), 8);
//! ```

use std::thread;

use crate::cache::Cache;
use crate::error::ConfigError;

/// Builder for [`Cache`] instances.
#[derive(Debug, Clone)]
pub struct CacheBuilder {
    capacity_bytes: usize,
    shards: Option<usize>,
}

impl CacheBuilder {
    /// Starts a builder for a cache of `capacity_bytes`.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            shards: None,
        }
    }

    /// Sets the shard count explicitly. When not set, the cache uses
    /// twice the available parallelism, so shard-lock contention stays
    /// low under one thread per core plus I/O threads.
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    /// Builds the cache, clamping a zero shard count to one.
    pub fn build(self) -> Cache {
        let shards = self.shards.unwrap_or_else(default_shards).max(1);
        Cache::new(self.capacity_bytes, shards)
    }

    /// Builds the cache, rejecting invalid configuration instead of
    /// clamping.
    ///
    /// # Example
    ///
    /// ```
    /// use blockcache::CacheBuilder;
    ///
    /// assert!(CacheBuilder::new(1024).shards(0).try_build().is_err());
    /// assert!(CacheBuilder::new(1024).shards(4).try_build().is_ok());
    /// ```
    pub fn try_build(self) -> Result<Cache, ConfigError> {
        if self.shards == Some(0) {
            return Err(ConfigError::new("shard count must be at least 1"));
        }
        let shards = self.shards.unwrap_or_else(default_shards).max(1);
        Ok(Cache::new(self.capacity_bytes, shards))
    }
}

fn default_shards() -> usize {
    thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::FileId;
    use crate::value::Value;

    #[test]
    fn build_uses_explicit_shards() {
        let cache = CacheBuilder::new(1024).shards(3).build();
        assert_eq!(cache.shard_count(), 3);
        assert_eq!(cache.capacity(), 1024);
    }

    #[test]
    fn build_defaults_to_parallelism() {
        let cache = CacheBuilder::new(1024).build();
        assert!(cache.shard_count() >= 1);
    }

    #[test]
    fn build_clamps_zero_shards() {
        let cache = CacheBuilder::new(1024).shards(0).build();
        assert_eq!(cache.shard_count(), 1);
    }

    #[test]
    fn try_build_rejects_zero_shards() {
        let err = CacheBuilder::new(1024).shards(0).try_build().unwrap_err();
        assert!(err.message().contains("shard"));
    }

    #[test]
    fn built_cache_round_trips() {
        let cache = CacheBuilder::new(1024).shards(2).build();
        cache.set(FileId(1), 0, Value::from_slice(b"abc")).release();
        assert_eq!(cache.get(FileId(1), 0).get(), Some(&b"abc"[..]));
    }
}
