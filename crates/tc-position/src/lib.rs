//! Position tracking for tradecore.
//!
//! Maintains the net position per symbol under weighted-average-cost
//! accounting and mirrors every change to a durable store.
//!
//! # Key Components
//!
//! - [`apply_fill`]: Pure fill accounting, including long/short flips
//! - [`PositionStore`]: Durable store seam
//! - [`StateManager`]: Authoritative in-memory positions

pub mod accounting;
pub mod error;
pub mod manager;
pub mod store;

pub use accounting::{apply_fill, realized_pnl, QTY_EPSILON};
pub use error::{PositionError, PositionResult};
pub use manager::{AppliedFill, StateManager};
pub use store::{DynPositionStore, MemoryPositionStore, PositionStore};
