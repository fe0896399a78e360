//! Persistence error types.

use tc_position::PositionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

impl From<PersistenceError> for PositionError {
    fn from(e: PersistenceError) -> Self {
        PositionError::Store(e.to_string())
    }
}
