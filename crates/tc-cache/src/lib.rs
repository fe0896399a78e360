//! Sharded, TTL-based price cache.
//!
//! Hot-path read for the latest market price of a symbol. Symbols are
//! spread across a fixed number of independently locked shards so readers
//! and writers of different symbols rarely contend.

pub mod cleanup;
pub mod shard;

pub use cleanup::spawn_cleanup_task;
pub use shard::{fnv1a_32, CacheStats, ShardedPriceCache, DEFAULT_SHARDS};
