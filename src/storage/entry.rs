//! Cache Entry
//!
//! Immutable record of one key/value pair plus its metadata.

use bytes::Bytes;
use std::fmt;

use crate::error::StoreError;

/// 64-bit compare-and-swap token, kept as the two 32-bit halves carried on
/// the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Cas(pub u32, pub u32);

impl Cas {
    pub fn from_u64(value: u64) -> Self {
        Self((value >> 32) as u32, value as u32)
    }

    pub fn as_u64(&self) -> u64 {
        (u64::from(self.0) << 32) | u64::from(self.1)
    }
}

/// Metadata stored alongside a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryMeta {
    /// Opaque client flags
    pub flags: u32,
    /// Expiry in epoch seconds. Recorded, never enforced.
    pub expire: u32,
    pub cas: Cas,
}

impl EntryMeta {
    pub fn new(flags: u32, expire: u32, cas: Cas) -> Self {
        Self { flags, expire, cas }
    }
}

/// A stored key/value pair.
///
/// Key and value share one allocation; both halves are cheap to clone and
/// never change after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheEntry {
    key: Bytes,
    value: Bytes,
    meta: EntryMeta,
}

impl CacheEntry {
    /// Copy `key` and `value` into a freshly reserved buffer.
    ///
    /// Fails with [`StoreError::Allocation`] instead of aborting when the
    /// allocator cannot satisfy the request.
    pub fn try_new(key: &[u8], value: &[u8], meta: EntryMeta) -> Result<Self, StoreError> {
        let requested = key.len() + value.len();
        let mut data = Vec::new();
        data.try_reserve_exact(requested)
            .map_err(|_| StoreError::Allocation { requested })?;
        data.extend_from_slice(key);
        data.extend_from_slice(value);

        let mut key = Bytes::from(data);
        let value = key.split_off(requested - value.len());
        Ok(Self { key, value, meta })
    }

    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Shared handle to the value bytes.
    pub fn value_bytes(&self) -> Bytes {
        self.value.clone()
    }

    #[inline]
    pub fn meta(&self) -> EntryMeta {
        self.meta
    }

    pub fn flags(&self) -> u32 {
        self.meta.flags
    }

    pub fn expire(&self) -> u32 {
        self.meta.expire
    }

    pub fn cas(&self) -> Cas {
        self.meta.cas
    }

    /// Copy as much of the value as fits into `buf`, returning the number of
    /// bytes copied.
    pub fn copy_value_into(&self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.value.len());
        buf[..n].copy_from_slice(&self.value[..n]);
        n
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &String::from_utf8_lossy(&self.key))
            .field("value_len", &self.value.len())
            .field("flags", &self.meta.flags)
            .field("expire", &self.meta.expire)
            .field("cas", &self.meta.cas.as_u64())
            .finish()
    }
}
