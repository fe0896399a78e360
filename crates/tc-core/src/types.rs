//! Account and position snapshots.

use crate::{Amount, Price, Qty, Symbol, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account balance triple.
///
/// `available + locked == total` is the target invariant. It may diverge
/// momentarily only across a reconciliation that replaces the whole triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub total: Amount,
    pub available: Amount,
    pub locked: Amount,
}

impl Balance {
    #[must_use]
    pub fn new(total: Amount, available: Amount, locked: Amount) -> Self {
        Self {
            total,
            available,
            locked,
        }
    }

    /// Balance with everything available and nothing locked.
    #[must_use]
    pub fn funded(total: Amount) -> Self {
        Self::new(total, total, Amount::ZERO)
    }

    /// Check `available + locked == total`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.available.checked_add(self.locked) == Some(self.total)
    }
}

/// Net position in a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument.
    pub symbol: Symbol,
    /// Signed quantity (positive = long, negative = short).
    pub qty: Qty,
    /// Cost basis of the currently open side. Zero when flat.
    pub avg_price: Price,
    /// User of the most recent fill, if any.
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Time of the last update.
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Flat (never traded) position for a symbol.
    #[must_use]
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            qty: Qty::ZERO,
            avg_price: Price::ZERO,
            user_id: None,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }
}
