//! Cached values and read handles.
//!
//! A [`CachedValue`] owns one key/value pair. The table stores values
//! behind shared handles; [`Finding`] is the read handle returned by
//! lookups. A value evicted or removed from the table stays alive until
//! the last outstanding `Finding` drops.

use std::sync::Arc;

/// Allocation overhead charged per value on top of key and value bytes.
///
/// Covers the value struct itself plus the shared-handle header. Usage
/// accounting only needs to be consistent, not byte-exact.
const VALUE_OVERHEAD: usize = std::mem::size_of::<CachedValue>() + 16;

/// An owned key/value pair held by the cache.
pub struct CachedValue {
    key: Box<[u8]>,
    value: Box<[u8]>,
}

impl CachedValue {
    /// Create a value by copying the given key and value bytes.
    pub fn new(key: &[u8], value: &[u8]) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The key bytes.
    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The value bytes.
    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Bytes charged against the cache's usage for this value,
    /// rounded up to an 8-byte boundary.
    pub fn size(&self) -> u64 {
        let raw = VALUE_OVERHEAD + self.key.len() + self.value.len();
        (raw as u64).next_multiple_of(8)
    }

    /// Whether this value's key matches `key`.
    #[inline]
    pub fn same_key(&self, key: &[u8]) -> bool {
        *self.key == *key
    }
}

impl std::fmt::Debug for CachedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedValue")
            .field("key_len", &self.key.len())
            .field("value_len", &self.value.len())
            .finish()
    }
}

/// Read handle for a cache hit.
///
/// Holds a shared reference to the value; the value cannot be freed while
/// any `Finding` for it is alive, even if it has since been evicted.
#[derive(Clone, Debug)]
pub struct Finding {
    value: Arc<CachedValue>,
}

impl Finding {
    pub(crate) fn new(value: Arc<CachedValue>) -> Self {
        Self { value }
    }

    /// The cached value's key bytes.
    #[inline]
    pub fn key(&self) -> &[u8] {
        self.value.key()
    }

    /// The cached value's value bytes.
    #[inline]
    pub fn value(&self) -> &[u8] {
        self.value.value()
    }

    /// Copy the value bytes out of the cache.
    pub fn copy_value(&self) -> Vec<u8> {
        self.value.value().to_vec()
    }
}
