//! Engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Position error: {0}")]
    Position(#[from] tc_position::PositionError),
}

pub type EngineResult<T> = Result<T, EngineError>;
