//! Balance error types.

use tc_core::Amount;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("Insufficient balance: need {need}, have {have}")]
    Insufficient { need: Amount, have: Amount },

    #[error("Balance overflow: {op} of {amount}")]
    Overflow { op: &'static str, amount: Amount },

    #[error("Balance source error: {0}")]
    Source(String),

    #[error("Manager factory failed: {0}")]
    Factory(String),
}

pub type BalanceResult<T> = Result<T, BalanceError>;
