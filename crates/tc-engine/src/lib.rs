//! tradecore account and market state engine.
//!
//! Wires the event bus, price cache, balance managers and position state
//! together and runs the consumers and background maintenance tasks:
//! - Price ticks into the sharded price cache
//! - Fills into positions and balance settlement
//! - Risk alerts into the log
//! - Idle-user eviction, cache cleanup and metrics snapshots

pub mod app;
pub mod config;
pub mod consumers;
pub mod error;

pub use app::{Engine, EngineDeps};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
