//! Event payloads carried by the engine's bus.
//!
//! The broker itself is generic and never inspects payloads; these types
//! are what the engine's producers and consumers agree on.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tc_core::{Position, Price, Qty, Side, Symbol, UserId};

/// Latest traded/close price for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: Symbol,
    pub price: Price,
    /// Exchange or receive time (Unix ms).
    pub timestamp_ms: i64,
}

impl PriceTick {
    pub fn new(symbol: Symbol, price: Price) -> Self {
        Self {
            symbol,
            price,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// An executed (fully or partially) order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: String,
    /// Owning tenant. `None` for the legacy single-account flow.
    pub user_id: Option<UserId>,
    pub symbol: Symbol,
    pub side: Side,
    /// Filled quantity (unsigned; direction comes from `side`).
    pub qty: Qty,
    /// Fill price. Zero when the venue did not report one.
    pub price: Price,
    pub timestamp_ms: i64,
}

impl FillEvent {
    pub fn new(
        user_id: Option<UserId>,
        symbol: Symbol,
        side: Side,
        qty: Qty,
        price: Price,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            user_id,
            symbol,
            side,
            qty,
            price,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Risk notification for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub user_id: Option<UserId>,
    pub message: String,
    pub timestamp_ms: i64,
}

impl RiskAlert {
    pub fn new(user_id: Option<UserId>, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Trade intent emitted by a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySignal {
    pub id: Uuid,
    pub strategy: String,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Qty,
    pub timestamp_ms: i64,
}

impl StrategySignal {
    pub fn new(strategy: impl Into<String>, symbol: Symbol, side: Side, qty: Qty) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy: strategy.into(),
            symbol,
            side,
            qty,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Bus payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PriceTick(PriceTick),
    Fill(FillEvent),
    RiskAlert(RiskAlert),
    StrategySignal(StrategySignal),
    PositionChange(Position),
}
