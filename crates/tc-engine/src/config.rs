//! Engine configuration.
//!
//! Loaded from a TOML file. Every field has a default, so a partial file
//! (or no file at all) yields a runnable dry-run configuration.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run without an exchange balance source.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    /// Seed balance of the global and every per-user dry-run manager.
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,

    #[serde(default)]
    pub balance: BalanceConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,
}

fn default_dry_run() -> bool {
    true
}

fn default_initial_balance() -> Decimal {
    Decimal::from(10_000)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run: default_dry_run(),
            initial_balance: default_initial_balance(),
            balance: BalanceConfig::default(),
            cache: CacheConfig::default(),
            bus: BusConfig::default(),
            metrics: MetricsConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Balance sync and per-user eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Per-user managers unused for this long are evicted. 0 disables eviction.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    #[serde(default = "default_balance_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_idle_ttl_secs() -> u64 {
    60 * 60
}

fn default_balance_cleanup_interval_secs() -> u64 {
    10 * 60
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            idle_ttl_secs: default_idle_ttl_secs(),
            cleanup_interval_secs: default_balance_cleanup_interval_secs(),
        }
    }
}

impl BalanceConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Price cache layout and freshness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Prices older than this are evicted by the cleanup task.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    #[serde(default = "default_cache_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_shards() -> usize {
    tc_cache::DEFAULT_SHARDS
}

fn default_max_age_secs() -> u64 {
    300
}

fn default_cache_cleanup_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            max_age_secs: default_max_age_secs(),
            cleanup_interval_secs: default_cache_cleanup_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber channel capacity.
    #[serde(default = "default_bus_buffer")]
    pub buffer: usize,
}

fn default_bus_buffer() -> usize {
    100
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer: default_bus_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_histogram_size")]
    pub histogram_size: usize,

    /// Period of the metrics snapshot log line. 0 disables it.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

fn default_histogram_size() -> usize {
    tc_telemetry::DEFAULT_WINDOW_SIZE
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: default_histogram_size(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the JSON Lines position tables.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn from_file(path: &str) -> EngineResult<Self> {
        if !Path::new(path).exists() {
            info!(path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML content.
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.initial_balance.is_sign_negative() {
            return Err(EngineError::Config(format!(
                "initial_balance must not be negative, got {}",
                self.initial_balance
            )));
        }
        if self.cache.max_age_secs == 0 {
            return Err(EngineError::Config(
                "cache.max_age_secs must be positive".to_string(),
            ));
        }
        if self.cache.cleanup_interval_secs == 0 || self.balance.cleanup_interval_secs == 0 {
            return Err(EngineError::Config(
                "cleanup intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
