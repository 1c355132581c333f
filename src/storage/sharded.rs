//! Sharded Store
//!
//! Fixed array of independently locked [`ShardIndex`] trees. A key is
//! routed to its shard by hashing every byte of the key; the hasher and the
//! shard count never change after construction, so a key always lands on
//! the same shard.
//!
//! Each shard sits behind a `parking_lot::RwLock`: any number of readers
//! or exactly one writer. A queued writer blocks new readers and proceeds
//! once the last reader leaves.

use crossbeam::utils::CachePadded;
use hashbrown::DefaultHashBuilder;
use parking_lot::RwLock;
use std::hash::BuildHasher;
use std::sync::Arc;
use tracing::debug;

use super::entry::{CacheEntry, EntryMeta};
use super::index::{Insert, ShardIndex};
use crate::error::StoreError;

/// What SET does when the key already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Swap in the new entry (upsert)
    #[default]
    Replace,
    /// Keep the stored entry and discard the new one (insert-if-absent)
    KeepExisting,
}

/// Outcome of a successful SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Key was not present before
    Stored,
    /// Key was present and now holds the new entry
    Replaced,
    /// Key was present and kept its old entry
    Duplicate,
}

/// Result of copying a value into a caller buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    /// Full length of the stored value
    pub value_len: usize,
    /// Bytes actually copied into the caller buffer
    pub copied: usize,
    pub meta: EntryMeta,
}

impl Lookup {
    pub fn is_truncated(&self) -> bool {
        self.copied < self.value_len
    }
}

type Shard = CachePadded<RwLock<ShardIndex>>;

struct Inner<S> {
    shards: Box<[Shard]>,
    hasher: S,
    policy: DuplicatePolicy,
}

/// Thread-safe sharded key-value store
#[derive(Clone)]
pub struct ShardedStore<S = DefaultHashBuilder> {
    inner: Arc<Inner<S>>,
}

impl ShardedStore<DefaultHashBuilder> {
    /// Create a store with `shard_count` shards (at least one) that replaces
    /// entries on duplicate SET.
    pub fn new(shard_count: usize) -> Self {
        Self::with_policy(shard_count, DuplicatePolicy::default())
    }

    pub fn with_policy(shard_count: usize, policy: DuplicatePolicy) -> Self {
        Self::with_hasher(shard_count, policy, DefaultHashBuilder::default())
    }
}

impl<S: BuildHasher> ShardedStore<S> {
    /// Create a store routing keys with a custom hasher
    pub fn with_hasher(shard_count: usize, policy: DuplicatePolicy, hasher: S) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| CachePadded::new(RwLock::new(ShardIndex::new())))
            .collect();

        Self {
            inner: Arc::new(Inner {
                shards,
                hasher,
                policy,
            }),
        }
    }

    /// Index of the shard owning `key`
    #[inline]
    pub fn shard_of(&self, key: &[u8]) -> usize {
        let hash = self.inner.hasher.hash_one(key);
        (hash % self.inner.shards.len() as u64) as usize
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &RwLock<ShardIndex> {
        &self.inner.shards[self.shard_of(key)]
    }

    /// Get a copy of the entry stored under `key`
    pub fn get(&self, key: &[u8]) -> Option<CacheEntry> {
        self.shard(key).read().find(key).cloned()
    }

    /// Copy the value stored under `key` into `buf`.
    ///
    /// At most `buf.len()` bytes are copied, but the full stored length is
    /// reported so the caller can retry with a larger buffer. The copy
    /// completes before the shard lock is released.
    pub fn get_into(&self, key: &[u8], buf: &mut [u8]) -> Option<Lookup> {
        let index = self.shard(key).read();
        let entry = index.find(key)?;
        Some(Lookup {
            value_len: entry.value().len(),
            copied: entry.copy_value_into(buf),
            meta: entry.meta(),
        })
    }

    /// Store `value` under `key`.
    ///
    /// The entry is built before the shard lock is taken, so an allocation
    /// failure never leaves the shard locked or modified.
    pub fn set(&self, key: &[u8], value: &[u8], meta: EntryMeta) -> Result<SetOutcome, StoreError> {
        let entry = CacheEntry::try_new(key, value, meta)?;

        let outcome = {
            let mut index = self.shard(key).write();
            match self.inner.policy {
                DuplicatePolicy::Replace => index.replace(entry),
                DuplicatePolicy::KeepExisting => index.insert(entry),
            }
        };

        // displaced entries are dropped here, outside the lock
        Ok(match outcome {
            Insert::Inserted => SetOutcome::Stored,
            Insert::Replaced(_) => SetOutcome::Replaced,
            Insert::Duplicate(_) => SetOutcome::Duplicate,
        })
    }

    /// Total number of entries across all shards
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.shards.iter().all(|shard| shard.read().is_empty())
    }

    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.inner.policy
    }

    /// Log the contents of every non-empty shard
    pub fn dump(&self) {
        debug!(shards = self.shard_count(), entries = self.len(), "Store dump");
        for (i, shard) in self.inner.shards.iter().enumerate() {
            let index = shard.read();
            if !index.is_empty() {
                index.dump(i);
            }
        }
    }

    #[cfg(test)]
    fn shard_lock(&self, shard: usize) -> &RwLock<ShardIndex> {
        &self.inner.shards[shard]
    }
}
