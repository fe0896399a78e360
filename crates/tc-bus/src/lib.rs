//! In-process publish/subscribe event broker.
//!
//! Decouples market-data and fill producers from cache, position, balance
//! and risk consumers. Publishing never blocks: a subscriber whose buffer is
//! full simply misses that payload.
//!
//! # Key Components
//!
//! - [`Topic`]: Static set of event categories
//! - [`EventBus`]: Topic registry with non-blocking fan-out
//! - [`Unsubscribe`]: Idempotent handle removing one subscription
//! - [`Event`]: Payload enum used by the engine

pub mod bus;
pub mod event;
pub mod topic;

pub use bus::{EventBus, Unsubscribe};
pub use event::{Event, FillEvent, PriceTick, RiskAlert, StrategySignal};
pub use topic::Topic;
