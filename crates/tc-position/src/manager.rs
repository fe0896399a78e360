//! Authoritative in-memory positions mirrored to a durable store.
//!
//! Writers (`record_fill`, `set_position`, `load`) serialize on one async
//! gate that is held across the store round-trip, so fills apply in strict
//! submission order across all symbols. Readers use a separate map lock and
//! never wait on the store; they see the pre-fill position until the write
//! commits to memory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tc_core::{Amount, Position, Price, Qty, Side, Symbol, UserId};
use tc_telemetry::{LatencyHistogram, Metrics, Timer};

use crate::accounting::{apply_fill, realized_pnl};
use crate::error::{PositionError, PositionResult};
use crate::store::DynPositionStore;

/// Outcome of one applied fill, captured under the write gate.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedFill {
    pub previous: Position,
    pub position: Position,
    /// `None` when the fill opened or added to the position.
    pub realized_pnl: Option<Amount>,
}

pub struct StateManager {
    store: DynPositionStore,
    positions: RwLock<HashMap<Symbol, Position>>,
    write_gate: Mutex<()>,
    db_latency: Option<Arc<LatencyHistogram>>,
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("positions", &self.positions.read().len())
            .finish()
    }
}

impl StateManager {
    pub fn new(store: DynPositionStore) -> Self {
        Self {
            store,
            positions: RwLock::new(HashMap::new()),
            write_gate: Mutex::new(()),
            db_latency: None,
        }
    }

    /// Time every store round-trip into `histogram`.
    #[must_use]
    pub fn with_db_latency(mut self, histogram: Arc<LatencyHistogram>) -> Self {
        self.db_latency = Some(histogram);
        self
    }

    /// Replace in-memory state with the store's contents.
    pub async fn load(&self) -> PositionResult<usize> {
        let _gate = self.write_gate.lock().await;

        let timer = Timer::start(self.db_latency.clone(), "db");
        let loaded = self.store.list_positions().await;
        timer.stop();
        let loaded = loaded?;

        let count = loaded.len();
        let map: HashMap<Symbol, Position> = loaded
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        *self.positions.write() = map;

        info!(count, "Positions loaded");
        Ok(count)
    }

    /// Current position, flat if the symbol was never traded.
    pub fn position(&self, symbol: &Symbol) -> Position {
        self.positions
            .read()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol.clone()))
    }

    /// Snapshot of every tracked position, ordered by symbol.
    pub fn positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.read().values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    /// Apply a fill and return the position before and after it.
    ///
    /// The new position is written to the store first (legacy row, plus the
    /// per-user row when `user` is given). Store failures are logged and
    /// counted, never returned: memory is updated regardless and stays
    /// authoritative. A fill whose arithmetic overflows is rejected before
    /// anything is written.
    pub async fn record_fill(
        &self,
        user: Option<&UserId>,
        symbol: &Symbol,
        side: Side,
        qty: Qty,
        price: Price,
    ) -> PositionResult<AppliedFill> {
        if qty.inner() <= Decimal::ZERO {
            return Err(PositionError::InvalidFill(format!(
                "quantity must be positive, got {qty}"
            )));
        }

        let _gate = self.write_gate.lock().await;

        let previous = self.position(symbol);
        let (new_qty, new_avg) = apply_fill(previous.qty, previous.avg_price, side, qty, price)
            .ok_or_else(|| {
                PositionError::InvalidFill(format!(
                    "fill of {qty} at {price} overflows position arithmetic"
                ))
            })?;
        let reduces = matches!(
            (side, previous.qty.is_long(), previous.qty.is_short()),
            (Side::Sell, true, _) | (Side::Buy, _, true)
        );
        let pnl = if reduces {
            realized_pnl(previous.qty, previous.avg_price, side, qty, price)
        } else {
            None
        };
        let updated = Position {
            symbol: symbol.clone(),
            qty: new_qty,
            avg_price: new_avg,
            user_id: user.cloned(),
            updated_at: Utc::now(),
        };

        self.persist(user, &updated).await;

        self.positions
            .write()
            .insert(symbol.clone(), updated.clone());
        Metrics::position_fill(side.as_label());

        debug!(
            symbol = %symbol,
            side = %side,
            fill_qty = %qty,
            fill_price = %price,
            qty = %updated.qty,
            avg_price = %updated.avg_price,
            "Fill recorded"
        );
        Ok(AppliedFill {
            previous,
            position: updated,
            realized_pnl: pnl,
        })
    }

    /// Overwrite a position directly (external reconciliation).
    ///
    /// Unlike `record_fill`, a store failure is returned and memory is left
    /// unchanged.
    pub async fn set_position(
        &self,
        symbol: &Symbol,
        qty: Qty,
        avg_price: Price,
    ) -> PositionResult<()> {
        let _gate = self.write_gate.lock().await;

        let previous_user = self
            .positions
            .read()
            .get(symbol)
            .and_then(|p| p.user_id.clone());
        let position = Position {
            symbol: symbol.clone(),
            qty,
            avg_price,
            user_id: previous_user,
            updated_at: Utc::now(),
        };

        let timer = Timer::start(self.db_latency.clone(), "db");
        let result = self.store.upsert_position(&position).await;
        timer.stop();
        result?;

        self.positions.write().insert(symbol.clone(), position);
        info!(symbol = %symbol, qty = %qty, avg_price = %avg_price, "Position overridden");
        Ok(())
    }

    async fn persist(&self, user: Option<&UserId>, position: &Position) {
        let timer = Timer::start(self.db_latency.clone(), "db");
        if let Err(e) = self.store.upsert_position(position).await {
            Metrics::position_persist_failed();
            warn!(symbol = %position.symbol, error = %e, "Failed to persist position");
        }

        if let Some(user) = user {
            if let Err(e) = self
                .store
                .upsert_user_position(user, &position.symbol, position.qty, position.avg_price)
                .await
            {
                Metrics::position_persist_failed();
                warn!(
                    user = %user,
                    symbol = %position.symbol,
                    error = %e,
                    "Failed to persist user position"
                );
            }
        }
        timer.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPositionStore;
    use rust_decimal_macros::dec;

    fn manager() -> (StateManager, Arc<MemoryPositionStore>) {
        let store = Arc::new(MemoryPositionStore::new());
        (StateManager::new(store.clone()), store)
    }

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT")
    }

    #[test]
    fn test_unknown_symbol_is_flat() {
        let (m, _) = manager();
        let p = m.position(&btc());
        assert!(p.is_flat());
        assert_eq!(p.avg_price, Price::ZERO);
        assert_eq!(p.symbol, btc());
    }

    #[tokio::test]
    async fn test_record_fill_updates_memory_and_store() {
        let (m, store) = manager();
        let alice = UserId::new("alice");

        let p = m
            .record_fill(
                Some(&alice),
                &btc(),
                Side::Buy,
                Qty::new(dec!(2)),
                Price::new(dec!(100)),
            )
            .await
            .unwrap()
            .position;

        assert_eq!(p.qty, Qty::new(dec!(2)));
        assert_eq!(p.user_id, Some(alice.clone()));
        assert_eq!(m.position(&btc()), p);
        assert_eq!(store.stored(&btc()), Some(p.clone()));
        assert_eq!(
            store.user_position(&alice, &btc()),
            Some((Qty::new(dec!(2)), Price::new(dec!(100))))
        );
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn test_record_fill_without_user_skips_user_table() {
        let (m, store) = manager();
        m.record_fill(None, &btc(), Side::Sell, Qty::new(dec!(1)), Price::new(dec!(10)))
            .await
            .unwrap();

        assert_eq!(store.writes(), 1);
        assert_eq!(m.position(&btc()).qty, Qty::new(dec!(-1)));
    }

    #[tokio::test]
    async fn test_close_to_zero_reset() {
        let (m, _) = manager();
        m.record_fill(None, &btc(), Side::Buy, Qty::new(dec!(1)), Price::new(dec!(100)))
            .await
            .unwrap();
        let applied = m
            .record_fill(None, &btc(), Side::Sell, Qty::new(dec!(1)), Price::new(dec!(150)))
            .await
            .unwrap();

        assert_eq!(applied.position.qty, Qty::ZERO);
        assert_eq!(applied.position.avg_price, Price::ZERO);
        assert_eq!(applied.previous.qty, Qty::new(dec!(1)));
        assert_eq!(applied.realized_pnl, Some(Amount::new(dec!(50))));
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_fill() {
        let (m, store) = manager();
        store.set_fail(true);

        let p = m
            .record_fill(
                Some(&UserId::new("bob")),
                &btc(),
                Side::Buy,
                Qty::new(dec!(3)),
                Price::new(dec!(20)),
            )
            .await
            .unwrap()
            .position;

        assert_eq!(p.qty, Qty::new(dec!(3)));
        assert_eq!(m.position(&btc()).qty, Qty::new(dec!(3)));
        assert!(store.stored(&btc()).is_none());
    }

    #[tokio::test]
    async fn test_non_positive_qty_rejected() {
        let (m, store) = manager();
        let err = m
            .record_fill(None, &btc(), Side::Buy, Qty::ZERO, Price::new(dec!(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, PositionError::InvalidFill(_)));
        assert_eq!(store.writes(), 0);
        assert!(m.positions().is_empty());
    }

    #[tokio::test]
    async fn test_overflowing_fill_rejected() {
        let (m, store) = manager();
        let shib = Symbol::new("SHIB");
        let err = m
            .record_fill(
                None,
                &shib,
                Side::Buy,
                Qty::new(dec!(100000000000000000000)),
                Price::new(dec!(1000000000)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PositionError::InvalidFill(_)));
        assert_eq!(store.writes(), 0);
        assert!(m.positions().is_empty());
    }

    #[tokio::test]
    async fn test_opening_fill_has_no_realized_pnl() {
        let (m, _) = manager();
        let applied = m
            .record_fill(None, &btc(), Side::Sell, Qty::new(dec!(2)), Price::new(dec!(10)))
            .await
            .unwrap();

        assert!(applied.previous.is_flat());
        assert_eq!(applied.realized_pnl, None);
    }

    #[tokio::test]
    async fn test_previous_reflects_serialized_order() {
        let (m, _) = manager();
        m.record_fill(None, &btc(), Side::Buy, Qty::new(dec!(2)), Price::new(dec!(100)))
            .await
            .unwrap();

        let applied = m
            .record_fill(None, &btc(), Side::Sell, Qty::new(dec!(3)), Price::new(dec!(130)))
            .await
            .unwrap();

        assert_eq!(applied.previous.qty, Qty::new(dec!(2)));
        assert_eq!(applied.realized_pnl, Some(Amount::new(dec!(60))));
        assert_eq!(applied.position.qty, Qty::new(dec!(-1)));
        assert_eq!(applied.position.avg_price, Price::new(dec!(130)));
    }

    #[tokio::test]
    async fn test_user_is_last_fill_owner() {
        let (m, _) = manager();
        let alice = UserId::new("alice");
        m.record_fill(Some(&alice), &btc(), Side::Buy, Qty::new(dec!(1)), Price::new(dec!(1)))
            .await
            .unwrap();
        m.record_fill(None, &btc(), Side::Buy, Qty::new(dec!(1)), Price::new(dec!(1)))
            .await
            .unwrap();

        assert_eq!(m.position(&btc()).user_id, None);
    }

    #[tokio::test]
    async fn test_set_position_failure_leaves_memory() {
        let (m, store) = manager();
        m.set_position(&btc(), Qty::new(dec!(1)), Price::new(dec!(5)))
            .await
            .unwrap();

        store.set_fail(true);
        let err = m
            .set_position(&btc(), Qty::new(dec!(9)), Price::new(dec!(9)))
            .await
            .unwrap_err();

        assert!(matches!(err, PositionError::Store(_)));
        assert_eq!(m.position(&btc()).qty, Qty::new(dec!(1)));
    }

    #[tokio::test]
    async fn test_load_seeds_from_store() {
        let mut seeded = Position::flat(Symbol::new("ETHUSDT"));
        seeded.qty = Qty::new(dec!(-4));
        seeded.avg_price = Price::new(dec!(2000));
        let store = Arc::new(MemoryPositionStore::with_positions([seeded.clone()]));
        let m = StateManager::new(store);

        assert_eq!(m.load().await.unwrap(), 1);
        assert_eq!(m.position(&Symbol::new("ETHUSDT")), seeded);
        assert_eq!(m.positions().len(), 1);
    }

    #[tokio::test]
    async fn test_load_failure_keeps_memory() {
        let (m, store) = manager();
        m.record_fill(None, &btc(), Side::Buy, Qty::new(dec!(1)), Price::new(dec!(1)))
            .await
            .unwrap();
        store.set_fail(true);

        assert!(m.load().await.is_err());
        assert_eq!(m.positions().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fills_are_serialized() {
        let store = Arc::new(MemoryPositionStore::new());
        let m = Arc::new(StateManager::new(store));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let m = m.clone();
                tokio::spawn(async move {
                    m.record_fill(None, &btc(), Side::Buy, Qty::new(dec!(1)), Price::new(dec!(10)))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let p = m.position(&btc());
        assert_eq!(p.qty, Qty::new(dec!(50)));
        assert_eq!(p.avg_price, Price::new(dec!(10)));
    }

    #[tokio::test]
    async fn test_db_latency_recorded() {
        let store = Arc::new(MemoryPositionStore::new());
        let histogram = Arc::new(LatencyHistogram::new(10));
        let m = StateManager::new(store).with_db_latency(histogram.clone());

        m.record_fill(None, &btc(), Side::Buy, Qty::new(dec!(1)), Price::new(dec!(1)))
            .await
            .unwrap();

        assert_eq!(histogram.len(), 1);
    }
}
