//! JSON Lines implementation of [`PositionStore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tc_core::{BoxFuture, Position, Price, Qty, Symbol, UserId};
use tc_position::{PositionResult, PositionStore};

use crate::error::PersistenceResult;
use crate::jsonl::JsonLinesFile;

/// Legacy symbol-keyed table.
pub const POSITIONS_FILE: &str = "positions.jsonl";
/// Per-user table keyed by (user, symbol).
pub const USER_POSITIONS_FILE: &str = "user_positions.jsonl";
/// A table is never compacted at runtime below this many lines.
pub const COMPACT_MIN_LINES: usize = 1024;
/// Runtime compaction triggers once lines exceed this multiple of live keys.
const COMPACT_KEY_FACTOR: usize = 4;

/// Row of the per-user table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPositionRecord {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub qty: Qty,
    pub avg_price: Price,
    pub updated_at: DateTime<Utc>,
}

struct Tables {
    positions_file: JsonLinesFile<Position>,
    user_positions_file: JsonLinesFile<UserPositionRecord>,
    positions: HashMap<Symbol, Position>,
    user_positions: HashMap<(UserId, Symbol), UserPositionRecord>,
    positions_lines: usize,
    user_positions_lines: usize,
    compact_min_lines: usize,
}

fn needs_compaction(lines: usize, keys: usize, min_lines: usize) -> bool {
    lines > (keys * COMPACT_KEY_FACTOR).max(min_lines)
}

/// Position store backed by two append-only JSON Lines files.
///
/// The latest row per key is indexed in memory; `list_positions` serves
/// from that index. Writes are synchronous file appends. Superseded rows
/// are dropped by rewriting a table from the index, once on open and again
/// whenever its line count outgrows the live keys.
pub struct JsonlPositionStore {
    data_dir: PathBuf,
    tables: Mutex<Tables>,
}

impl std::fmt::Debug for JsonlPositionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlPositionStore")
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl JsonlPositionStore {
    /// Open the store under `data_dir`, replaying and compacting both tables.
    pub fn open(data_dir: impl AsRef<Path>) -> PersistenceResult<Self> {
        Self::open_with_compaction(data_dir, COMPACT_MIN_LINES)
    }

    /// Like [`open`](Self::open) with a custom runtime compaction floor.
    pub fn open_with_compaction(
        data_dir: impl AsRef<Path>,
        compact_min_lines: usize,
    ) -> PersistenceResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let mut positions_file = JsonLinesFile::<Position>::open(data_dir.join(POSITIONS_FILE))?;
        let mut user_positions_file =
            JsonLinesFile::<UserPositionRecord>::open(data_dir.join(USER_POSITIONS_FILE))?;

        // Last row per key wins
        let rows = positions_file.read_all()?;
        let replayed = rows.len();
        let positions: HashMap<Symbol, Position> =
            rows.into_iter().map(|p| (p.symbol.clone(), p)).collect();
        if replayed > positions.len() {
            positions_file.rewrite(positions.values())?;
        }

        let rows = user_positions_file.read_all()?;
        let user_replayed = rows.len();
        let user_positions: HashMap<(UserId, Symbol), UserPositionRecord> = rows
            .into_iter()
            .map(|r| ((r.user_id.clone(), r.symbol.clone()), r))
            .collect();
        if user_replayed > user_positions.len() {
            user_positions_file.rewrite(user_positions.values())?;
        }

        info!(
            data_dir = %data_dir.display(),
            positions = positions.len(),
            user_positions = user_positions.len(),
            replayed_lines = replayed + user_replayed,
            "Position store opened"
        );

        Ok(Self {
            data_dir,
            tables: Mutex::new(Tables {
                positions_file,
                user_positions_file,
                positions_lines: positions.len(),
                user_positions_lines: user_positions.len(),
                positions,
                user_positions,
                compact_min_lines,
            }),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Latest per-user row for `(user, symbol)`.
    pub fn user_position(&self, user: &UserId, symbol: &Symbol) -> Option<UserPositionRecord> {
        self.tables
            .lock()
            .user_positions
            .get(&(user.clone(), symbol.clone()))
            .cloned()
    }

    /// Every per-user row for `user`, ordered by symbol.
    pub fn user_positions(&self, user: &UserId) -> Vec<UserPositionRecord> {
        let mut rows: Vec<UserPositionRecord> = self
            .tables
            .lock()
            .user_positions
            .values()
            .filter(|r| &r.user_id == user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        rows
    }

    fn write_position(&self, position: &Position) -> PersistenceResult<()> {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;
        tables.positions_file.append(position)?;
        tables
            .positions
            .insert(position.symbol.clone(), position.clone());
        tables.positions_lines += 1;

        if needs_compaction(
            tables.positions_lines,
            tables.positions.len(),
            tables.compact_min_lines,
        ) {
            match tables.positions_file.rewrite(tables.positions.values()) {
                Ok(lines) => tables.positions_lines = lines,
                Err(e) => warn!(error = %e, "Failed to compact positions table"),
            }
        }
        Ok(())
    }

    fn write_user_position(&self, record: UserPositionRecord) -> PersistenceResult<()> {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;
        tables.user_positions_file.append(&record)?;
        tables
            .user_positions
            .insert((record.user_id.clone(), record.symbol.clone()), record);
        tables.user_positions_lines += 1;

        if needs_compaction(
            tables.user_positions_lines,
            tables.user_positions.len(),
            tables.compact_min_lines,
        ) {
            match tables.user_positions_file.rewrite(tables.user_positions.values()) {
                Ok(lines) => tables.user_positions_lines = lines,
                Err(e) => warn!(error = %e, "Failed to compact user positions table"),
            }
        }
        Ok(())
    }
}

impl PositionStore for JsonlPositionStore {
    fn list_positions(&self) -> BoxFuture<'_, PositionResult<Vec<Position>>> {
        Box::pin(async move {
            let mut all: Vec<Position> = self.tables.lock().positions.values().cloned().collect();
            all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            Ok(all)
        })
    }

    fn upsert_position<'a>(&'a self, position: &'a Position) -> BoxFuture<'a, PositionResult<()>> {
        Box::pin(async move { Ok(self.write_position(position)?) })
    }

    fn upsert_user_position<'a>(
        &'a self,
        user: &'a UserId,
        symbol: &'a Symbol,
        qty: Qty,
        avg_price: Price,
    ) -> BoxFuture<'a, PositionResult<()>> {
        Box::pin(async move {
            let record = UserPositionRecord {
                user_id: user.clone(),
                symbol: symbol.clone(),
                qty,
                avg_price,
                updated_at: Utc::now(),
            };
            Ok(self.write_user_position(record)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tc_core::Side;
    use tc_position::StateManager;
    use tempfile::TempDir;

    fn position(symbol: &str, qty: rust_decimal::Decimal, avg: rust_decimal::Decimal) -> Position {
        let mut p = Position::flat(Symbol::new(symbol));
        p.qty = Qty::new(qty);
        p.avg_price = Price::new(avg);
        p
    }

    #[tokio::test]
    async fn test_last_upsert_wins_across_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = JsonlPositionStore::open(temp_dir.path()).unwrap();
            store
                .upsert_position(&position("BTC", dec!(1), dec!(100)))
                .await
                .unwrap();
            store
                .upsert_position(&position("ETH", dec!(-2), dec!(10)))
                .await
                .unwrap();
            store
                .upsert_position(&position("BTC", dec!(3), dec!(120)))
                .await
                .unwrap();
        }

        let store = JsonlPositionStore::open(temp_dir.path()).unwrap();
        let all = store.list_positions().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].symbol, Symbol::new("BTC"));
        assert_eq!(all[0].qty, Qty::new(dec!(3)));
        assert_eq!(all[0].avg_price, Price::new(dec!(120)));
        assert_eq!(all[1].qty, Qty::new(dec!(-2)));
    }

    #[tokio::test]
    async fn test_user_rows_keyed_by_user_and_symbol() {
        let temp_dir = TempDir::new().unwrap();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let btc = Symbol::new("BTC");

        {
            let store = JsonlPositionStore::open(temp_dir.path()).unwrap();
            store
                .upsert_user_position(&alice, &btc, Qty::new(dec!(1)), Price::new(dec!(100)))
                .await
                .unwrap();
            store
                .upsert_user_position(&bob, &btc, Qty::new(dec!(-1)), Price::new(dec!(90)))
                .await
                .unwrap();
            store
                .upsert_user_position(&alice, &btc, Qty::new(dec!(2)), Price::new(dec!(110)))
                .await
                .unwrap();
        }

        let store = JsonlPositionStore::open(temp_dir.path()).unwrap();
        let a = store.user_position(&alice, &btc).unwrap();
        assert_eq!(a.qty, Qty::new(dec!(2)));
        assert_eq!(a.avg_price, Price::new(dec!(110)));
        assert_eq!(store.user_positions(&bob).len(), 1);
        assert!(store.list_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_manager_restores_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let btc = Symbol::new("BTCUSDT");

        {
            let store = Arc::new(JsonlPositionStore::open(temp_dir.path()).unwrap());
            let manager = StateManager::new(store);
            manager
                .record_fill(
                    Some(&UserId::new("alice")),
                    &btc,
                    Side::Buy,
                    Qty::new(dec!(1)),
                    Price::new(dec!(100)),
                )
                .await
                .unwrap();
            manager
                .record_fill(None, &btc, Side::Buy, Qty::new(dec!(1)), Price::new(dec!(200)))
                .await
                .unwrap();
        }

        let store = Arc::new(JsonlPositionStore::open(temp_dir.path()).unwrap());
        let manager = StateManager::new(store.clone());
        manager.load().await.unwrap();

        let p = manager.position(&btc);
        assert_eq!(p.qty, Qty::new(dec!(2)));
        assert_eq!(p.avg_price, Price::new(dec!(150)));
        assert_eq!(p.user_id, None, "last fill carried no user");
        assert_eq!(
            store.user_position(&UserId::new("alice"), &btc).unwrap().qty,
            Qty::new(dec!(1))
        );
    }

    fn line_count(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count()
    }

    #[tokio::test]
    async fn test_reopen_compacts_superseded_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(POSITIONS_FILE);

        {
            let store = JsonlPositionStore::open(temp_dir.path()).unwrap();
            for i in 1..=1000u32 {
                store
                    .upsert_position(&position("BTC", rust_decimal::Decimal::from(i), dec!(100)))
                    .await
                    .unwrap();
            }
            assert_eq!(line_count(&path), 1000);
        }

        let store = JsonlPositionStore::open(temp_dir.path()).unwrap();
        assert_eq!(line_count(&path), 1);
        let all = store.list_positions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].qty, Qty::new(dec!(1000)));

        drop(store);
        let store = JsonlPositionStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.list_positions().await.unwrap()[0].qty, Qty::new(dec!(1000)));
    }

    #[tokio::test]
    async fn test_runtime_compaction_bounds_file_growth() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(POSITIONS_FILE);
        let store = JsonlPositionStore::open_with_compaction(temp_dir.path(), 8).unwrap();

        for i in 1..=100u32 {
            let qty = rust_decimal::Decimal::from(i);
            store
                .upsert_position(&position("BTC", qty, dec!(1)))
                .await
                .unwrap();
            store
                .upsert_position(&position("ETH", -qty, dec!(2)))
                .await
                .unwrap();
            assert!(line_count(&path) <= 8);
        }

        drop(store);
        let store = JsonlPositionStore::open(temp_dir.path()).unwrap();
        let all = store.list_positions().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].qty, Qty::new(dec!(100)));
        assert_eq!(all[1].qty, Qty::new(dec!(-100)));
    }

    #[tokio::test]
    async fn test_user_table_compacts() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(USER_POSITIONS_FILE);
        let alice = UserId::new("alice");
        let btc = Symbol::new("BTC");

        {
            let store = JsonlPositionStore::open_with_compaction(temp_dir.path(), 4).unwrap();
            for i in 1..=50u32 {
                store
                    .upsert_user_position(
                        &alice,
                        &btc,
                        Qty::new(rust_decimal::Decimal::from(i)),
                        Price::new(dec!(10)),
                    )
                    .await
                    .unwrap();
            }
            assert!(line_count(&path) <= 4);
        }

        let store = JsonlPositionStore::open(temp_dir.path()).unwrap();
        assert_eq!(line_count(&path), 1);
        assert_eq!(store.user_position(&alice, &btc).unwrap().qty, Qty::new(dec!(50)));
    }
}
