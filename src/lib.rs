//! blockcache: a sharded CLOCK-Pro block cache with refcounted zero-copy
//! handles.
//!
//! Designed to sit in front of a storage engine (e.g. an LSM-tree's block
//! cache): fixed byte capacity, `(file, offset)` keys, adaptive
//! hot/cold/test eviction, per-file bulk eviction, and capacity
//! reservations. Reads never copy: callers get a [`Handle`] whose
//! lifetime, not the entry's residency, governs buffer liveness.
//!
//! ```
//! use blockcache::{Cache, FileId, Value};
//!
//! let cache = Cache::new(64 << 10, 4);
//!
//! let mut block = Value::alloc(4);
//! block.buf_mut().copy_from_slice(b"data");
//! cache.set(FileId(1), 0, block).release();
//!
//! let handle = cache.get(FileId(1), 0);
//! assert_eq!(handle.get(), Some(&b"data"[..]));
//! handle.release();
//! ```

pub mod builder;
pub mod cache;
mod entry;
pub mod error;
pub mod handle;
pub mod metrics;
mod shard;
pub mod value;

pub use builder::CacheBuilder;
pub use cache::{Cache, Reservation};
pub use entry::FileId;
pub use error::ConfigError;
pub use handle::Handle;
pub use metrics::MetricsSnapshot;
pub use value::Value;
