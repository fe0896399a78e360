//! Balance management for tradecore.
//!
//! Tracks the total/available/locked triple of each account, reserves funds
//! for pending orders and periodically reconciles against the exchange.
//!
//! # Key Components
//!
//! - [`BalanceSource`]: Exchange-side balance seam
//! - [`BalanceManager`]: One account's cache with lock/unlock semantics
//! - [`MultiUserBalanceManager`]: Lazily populated per-user registry

pub mod error;
pub mod manager;
pub mod multi;
pub mod source;

pub use error::{BalanceError, BalanceResult};
pub use manager::{BalanceManager, DEFAULT_SYNC_INTERVAL};
pub use multi::{ManagerFactory, MultiUserBalanceManager};
pub use source::{BalanceSource, DynBalanceSource, MockBalanceSource};
