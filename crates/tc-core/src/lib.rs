//! Core domain types for the tradecore state engine.
//!
//! This crate provides fundamental types shared by every component:
//! - `Price`, `Qty`, `Amount`: Precision-safe numeric types
//! - `Side`: Fill/order direction
//! - `UserId`, `Symbol`: Tenant and instrument identifiers
//! - `Balance`, `Position`: Account and position snapshots
//! - `Clock`: Injectable time source

pub mod clock;
pub mod decimal;
pub mod error;
pub mod future;
pub mod ids;
pub mod side;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::{Amount, Price, Qty};
pub use error::{CoreError, Result};
pub use future::BoxFuture;
pub use ids::{Symbol, UserId};
pub use side::Side;
pub use types::{Balance, Position};
