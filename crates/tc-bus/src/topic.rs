//! Event topics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// High-level event category inside the trading core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    PriceTick,
    OrderUpdate,
    StrategySignal,
    RiskAlert,
    PositionChange,
    OrderSubmitted,
    OrderAccepted,
    OrderRejected,
    OrderFilled,
    OrderPartiallyFilled,
}

impl Topic {
    /// Every topic, in declaration order.
    pub const ALL: [Topic; 10] = [
        Topic::PriceTick,
        Topic::OrderUpdate,
        Topic::StrategySignal,
        Topic::RiskAlert,
        Topic::PositionChange,
        Topic::OrderSubmitted,
        Topic::OrderAccepted,
        Topic::OrderRejected,
        Topic::OrderFilled,
        Topic::OrderPartiallyFilled,
    ];

    /// Stable wire/metric name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceTick => "price_tick",
            Self::OrderUpdate => "order_update",
            Self::StrategySignal => "strategy_signal",
            Self::RiskAlert => "risk_alert",
            Self::PositionChange => "position_change",
            Self::OrderSubmitted => "order.submitted",
            Self::OrderAccepted => "order.accepted",
            Self::OrderRejected => "order.rejected",
            Self::OrderFilled => "order.filled",
            Self::OrderPartiallyFilled => "order.partially_filled",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
