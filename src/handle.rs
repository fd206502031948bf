//! Owning references to cached values.
//!
//! Every [`Cache::get`] and [`Cache::set`] returns a [`Handle`]. A
//! non-empty handle owns one reference to the value it points at, so the
//! payload stays readable, without any lock and without copying, even if
//! the entry is evicted, deleted, or the whole cache is dropped while the
//! handle is alive. Releasing the handle (explicitly or by drop) gives the
//! reference back; the last release frees the buffer.
//!
//! [`Cache::get`]: crate::Cache::get
//! [`Cache::set`]: crate::Cache::set

use std::sync::Arc;

use crate::value::Value;

/// An owning reference to a cached value, or the empty handle on a miss.
///
/// # Example
///
/// ```
/// use blockcache::{Cache, FileId, Value};
///
/// let cache = Cache::new(1024, 1);
/// cache.set(FileId(7), 0, Value::from_slice(b"hello")).release();
///
/// let handle = cache.get(FileId(7), 0);
/// assert_eq!(handle.get(), Some(&b"hello"[..]));
///
/// // The payload survives eviction for as long as the handle lives.
/// cache.delete(FileId(7), 0);
/// assert_eq!(handle.get(), Some(&b"hello"[..]));
/// handle.release();
/// ```
#[derive(Debug, Default)]
pub struct Handle {
    value: Option<Arc<Value>>,
}

impl Handle {
    /// The empty handle, returned on a miss.
    #[inline]
    pub fn empty() -> Self {
        Self { value: None }
    }

    #[inline]
    pub(crate) fn resident(value: Arc<Value>) -> Self {
        Self { value: Some(value) }
    }

    /// Returns the payload, or `None` for the empty handle.
    ///
    /// Takes no lock; the borrow is tied to the handle, not to the cache.
    #[inline]
    pub fn get(&self) -> Option<&[u8]> {
        self.value.as_deref().map(Value::buf)
    }

    /// Returns `true` if this is the empty handle.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Releases the handle's reference.
    ///
    /// Equivalent to dropping the handle; provided so call sites can make
    /// the release explicit. Consuming `self` makes double release a
    /// compile error.
    #[inline]
    pub fn release(self) {}

    #[cfg(test)]
    pub(crate) fn as_arc(&self) -> Option<&Arc<Value>> {
        self.value.as_ref()
    }
}
