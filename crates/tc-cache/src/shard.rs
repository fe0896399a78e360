//! Shard-partitioned symbol → price map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tc_core::{Clock, Price, Symbol, SystemClock};
use tc_telemetry::Metrics;

/// Shard count used by [`ShardedPriceCache::new`].
pub const DEFAULT_SHARDS: usize = 16;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Clone, Copy)]
struct PriceEntry {
    price: Price,
    updated_at_ms: u64,
}

/// Cache occupancy report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_items: usize,
    /// Item count per shard, indexed by shard.
    pub shard_counts: Vec<usize>,
    /// Age of the stalest entry. Zero when empty.
    pub oldest_age: Duration,
}

/// Price cache partitioned into independently locked shards.
///
/// The shard for a symbol is `fnv1a_32(symbol) % shard_count`; the shard
/// count is fixed for the lifetime of the cache.
pub struct ShardedPriceCache {
    shards: Vec<RwLock<HashMap<Symbol, PriceEntry>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ShardedPriceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedPriceCache")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

impl Default for ShardedPriceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedPriceCache {
    /// Cache with [`DEFAULT_SHARDS`] shards on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS, Arc::new(SystemClock))
    }

    /// Cache with a custom shard count and clock. A count of 0 uses the default.
    #[must_use]
    pub fn with_shards(shard_count: usize, clock: Arc<dyn Clock>) -> Self {
        let shard_count = if shard_count == 0 {
            DEFAULT_SHARDS
        } else {
            shard_count
        };
        Self {
            shards: (0..shard_count)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            clock,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_index(&self, symbol: &str) -> usize {
        fnv1a_32(symbol.as_bytes()) as usize % self.shards.len()
    }

    fn shard(&self, symbol: &str) -> &RwLock<HashMap<Symbol, PriceEntry>> {
        &self.shards[self.shard_index(symbol)]
    }

    /// Store the latest price for a symbol, stamped with the current time.
    pub fn set(&self, symbol: Symbol, price: Price) {
        let updated_at_ms = self.clock.now_ms();
        let shard = self.shard(symbol.as_str());
        shard.write().insert(
            symbol,
            PriceEntry {
                price,
                updated_at_ms,
            },
        );
    }

    /// Latest price for a symbol.
    pub fn get(&self, symbol: &str) -> Option<Price> {
        self.shard(symbol).read().get(symbol).map(|e| e.price)
    }

    /// Latest price and how long ago it was written.
    pub fn get_with_age(&self, symbol: &str) -> Option<(Price, Duration)> {
        let now = self.clock.now_ms();
        self.shard(symbol)
            .read()
            .get(symbol)
            .map(|e| (e.price, age(now, e.updated_at_ms)))
    }

    /// Remove a symbol. Returns whether it was present.
    pub fn delete(&self, symbol: &str) -> bool {
        self.shard(symbol).write().remove(symbol).is_some()
    }

    /// Evict entries last written more than `max_age` ago.
    ///
    /// Shards are swept one at a time. Returns the number removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(max_age.as_millis() as u64);

        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|_, e| e.updated_at_ms >= cutoff);
            removed += before - map.len();
        }

        Metrics::price_cache_evicted("stale", removed);
        Metrics::price_cache_items(self.len());
        if removed > 0 {
            debug!(removed, max_age_secs = max_age.as_secs(), "Evicted stale prices");
        }
        removed
    }

    /// Evict every symbol not in `valid`. Returns the number removed.
    pub fn cleanup_invalid(&self, valid: &[Symbol]) -> usize {
        let valid: HashSet<&str> = valid.iter().map(Symbol::as_str).collect();

        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|symbol, _| valid.contains(symbol.as_str()));
            removed += before - map.len();
        }

        Metrics::price_cache_evicted("invalid", removed);
        Metrics::price_cache_items(self.len());
        removed
    }

    /// Occupancy per shard and the age of the stalest entry.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_ms();
        let mut shard_counts = Vec::with_capacity(self.shards.len());
        let mut oldest_age = Duration::ZERO;

        for shard in &self.shards {
            let map = shard.read();
            shard_counts.push(map.len());
            if let Some(oldest) = map.values().map(|e| e.updated_at_ms).min() {
                oldest_age = oldest_age.max(age(now, oldest));
            }
        }

        let total_items = shard_counts.iter().sum();
        Metrics::price_cache_items(total_items);
        CacheStats {
            total_items,
            shard_counts,
            oldest_age,
        }
    }

    /// Total number of cached symbols.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Copy of every cached price.
    ///
    /// Shards are read one after another, so the result is not an atomic
    /// snapshot across shards.
    pub fn get_all(&self) -> HashMap<Symbol, Price> {
        let mut all = HashMap::with_capacity(self.len());
        for shard in &self.shards {
            all.extend(shard.read().iter().map(|(s, e)| (s.clone(), e.price)));
        }
        all
    }
}

fn age(now_ms: u64, updated_at_ms: u64) -> Duration {
    Duration::from_millis(now_ms.saturating_sub(updated_at_ms))
}
