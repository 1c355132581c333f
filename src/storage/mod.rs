//! Storage Engine
//!
//! Sharded in-memory key-value store. Each shard is a balanced ordered tree
//! behind its own reader/writer lock.

mod entry;
mod index;
mod sharded;

pub use entry::{CacheEntry, Cas, EntryMeta};
pub use index::{Insert, Iter, KeyOrder, Lexicographic, ShardIndex};
pub use sharded::{DuplicatePolicy, Lookup, SetOutcome, ShardedStore};
