//! Durable position store seam.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use tc_core::{BoxFuture, Position, Price, Qty, Symbol, UserId};

use crate::error::{PositionError, PositionResult};

/// Durability mirror for positions.
///
/// `upsert_position` writes the legacy single-tenant row keyed by symbol;
/// `upsert_user_position` writes the per-user row keyed by (user, symbol).
pub trait PositionStore: Send + Sync {
    fn list_positions(&self) -> BoxFuture<'_, PositionResult<Vec<Position>>>;

    fn upsert_position<'a>(&'a self, position: &'a Position) -> BoxFuture<'a, PositionResult<()>>;

    fn upsert_user_position<'a>(
        &'a self,
        user: &'a UserId,
        symbol: &'a Symbol,
        qty: Qty,
        avg_price: Price,
    ) -> BoxFuture<'a, PositionResult<()>>;
}

/// Arc wrapper for PositionStore trait objects.
pub type DynPositionStore = Arc<dyn PositionStore>;

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    positions: DashMap<Symbol, Position>,
    user_positions: DashMap<(UserId, Symbol), (Qty, Price)>,
    fail: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `positions`.
    pub fn with_positions(positions: impl IntoIterator<Item = Position>) -> Self {
        let store = Self::new();
        for p in positions {
            store.positions.insert(p.symbol.clone(), p);
        }
        store
    }

    /// Make subsequent calls fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Successful upserts so far (both tables).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn stored(&self, symbol: &Symbol) -> Option<Position> {
        self.positions.get(symbol).map(|p| p.clone())
    }

    pub fn user_position(&self, user: &UserId, symbol: &Symbol) -> Option<(Qty, Price)> {
        self.user_positions
            .get(&(user.clone(), symbol.clone()))
            .map(|e| *e)
    }

    fn check(&self) -> PositionResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PositionError::Store("memory store unavailable".to_string()));
        }
        Ok(())
    }
}

impl PositionStore for MemoryPositionStore {
    fn list_positions(&self) -> BoxFuture<'_, PositionResult<Vec<Position>>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.positions.iter().map(|e| e.value().clone()).collect())
        })
    }

    fn upsert_position<'a>(&'a self, position: &'a Position) -> BoxFuture<'a, PositionResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.positions
                .insert(position.symbol.clone(), position.clone());
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn upsert_user_position<'a>(
        &'a self,
        user: &'a UserId,
        symbol: &'a Symbol,
        qty: Qty,
        avg_price: Price,
    ) -> BoxFuture<'a, PositionResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.user_positions
                .insert((user.clone(), symbol.clone()), (qty, avg_price));
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
