//! Durable storage for tradecore positions.
//!
//! Every upsert is appended as one line to a JSON Lines file and the
//! latest row per key is rebuilt by replaying the file on open. A torn
//! final line only loses that one write. Tables are compacted down to one
//! row per key on open and whenever superseded rows pile up.

pub mod error;
pub mod jsonl;
pub mod store;

pub use error::{PersistenceError, PersistenceResult};
pub use jsonl::JsonLinesFile;
pub use store::{
    JsonlPositionStore, UserPositionRecord, COMPACT_MIN_LINES, POSITIONS_FILE,
    USER_POSITIONS_FILE,
};
