//! shardcache - Sharded In-Memory Cache Server
//!
//! A key-value cache speaking the memcached binary protocol (GET, SET,
//! QUIT) over TCP or UDP. Keys are spread over independently locked
//! balanced trees; connections flow through a fixed pool of buffers
//! served by a fixed pool of worker threads.

pub mod error;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod storage;

pub use error::{ConfigError, ProtocolError, ServerError, StoreError, TransportError};
pub use metrics::Metrics;
pub use protocol::{Command, Frame, Header, McCodec, OpCode, Status};
pub use server::{Config, Server, Transport};
pub use storage::{CacheEntry, Cas, DuplicatePolicy, EntryMeta, ShardIndex, ShardedStore};
