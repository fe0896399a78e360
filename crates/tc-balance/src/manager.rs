//! Single-account balance cache with reservations.
//!
//! `lock` moves funds from available to locked for a pending order and is
//! the only mutation checked against available funds. `unlock`, `deduct`
//! and `add` are applied without that check; a field driven negative is
//! logged and counted but not refused, since the next `sync` replaces the
//! whole triple anyway. Any mutation whose decimal arithmetic overflows is
//! dropped and leaves the triple unchanged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tc_core::{Amount, Balance};
use tc_telemetry::Metrics;

use crate::error::{BalanceError, BalanceResult};
use crate::source::DynBalanceSource;

/// Resync period used when none is configured.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct BalanceCache {
    balance: Balance,
    last_sync: Option<DateTime<Utc>>,
}

/// Balance cache for one account.
///
/// All reads and writes go through one `RwLock`; the lock is never held
/// across the exchange call in [`BalanceManager::sync`].
pub struct BalanceManager {
    cache: RwLock<BalanceCache>,
    source: Option<DynBalanceSource>,
    sync_interval: Duration,
}

impl std::fmt::Debug for BalanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceManager")
            .field("balance", &self.balance())
            .field("has_source", &self.source.is_some())
            .field("sync_interval", &self.sync_interval)
            .finish()
    }
}

impl BalanceManager {
    /// Create a manager. `source = None` runs in dry-run mode where `sync`
    /// is a no-op. A zero `sync_interval` falls back to the default.
    pub fn new(source: Option<DynBalanceSource>, sync_interval: Duration) -> Self {
        let sync_interval = if sync_interval.is_zero() {
            DEFAULT_SYNC_INTERVAL
        } else {
            sync_interval
        };
        Self {
            cache: RwLock::new(BalanceCache::default()),
            source,
            sync_interval,
        }
    }

    /// Dry-run manager seeded with `initial`.
    pub fn dry_run(initial: Amount) -> Self {
        let manager = Self::new(None, DEFAULT_SYNC_INTERVAL);
        manager.set_initial_balance(initial);
        manager
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    pub fn is_dry_run(&self) -> bool {
        self.source.is_none()
    }

    /// Replace the cached balance with the source's.
    ///
    /// On error the cache is left untouched and the error is returned.
    pub async fn sync(&self) -> BalanceResult<()> {
        let Some(source) = &self.source else {
            Metrics::balance_sync("skipped");
            return Ok(());
        };

        let fetched = match source.get_balance().await {
            Ok(b) => b,
            Err(e) => {
                Metrics::balance_sync("error");
                return Err(e);
            }
        };

        {
            let mut cache = self.cache.write();
            cache.balance = fetched;
            cache.last_sync = Some(Utc::now());
        }

        Metrics::balance_sync("ok");
        debug!(
            total = %fetched.total,
            available = %fetched.available,
            locked = %fetched.locked,
            "Balance synced"
        );
        Ok(())
    }

    /// Reserve `amount` for a pending order.
    pub fn lock(&self, amount: Amount) -> BalanceResult<()> {
        let mut cache = self.cache.write();
        let available = cache.balance.available;
        if amount > available {
            drop(cache);
            Metrics::balance_lock_rejected();
            return Err(BalanceError::Insufficient {
                need: amount,
                have: available,
            });
        }
        let shifted = available
            .checked_sub(amount)
            .zip(cache.balance.locked.checked_add(amount));
        let Some((available, locked)) = shifted else {
            drop(cache);
            report_overflow("lock", amount);
            return Err(BalanceError::Overflow { op: "lock", amount });
        };
        cache.balance.available = available;
        cache.balance.locked = locked;
        Ok(())
    }

    /// Release a reservation back to available.
    pub fn unlock(&self, amount: Amount) {
        self.apply("unlock", amount, |b| {
            Some(Balance {
                locked: b.locked.checked_sub(amount)?,
                available: b.available.checked_add(amount)?,
                ..b
            })
        });
    }

    /// Consume locked funds after a fill.
    pub fn deduct(&self, amount: Amount) {
        self.apply("deduct", amount, |b| {
            Some(Balance {
                locked: b.locked.checked_sub(amount)?,
                total: b.total.checked_sub(amount)?,
                ..b
            })
        });
    }

    /// Credit realized proceeds.
    pub fn add(&self, amount: Amount) {
        self.apply("add", amount, |b| {
            Some(Balance {
                available: b.available.checked_add(amount)?,
                total: b.total.checked_add(amount)?,
                ..b
            })
        });
    }

    /// Replace the triple with `update`'s result, or keep it on overflow.
    fn apply(
        &self,
        op: &'static str,
        amount: Amount,
        update: impl FnOnce(Balance) -> Option<Balance>,
    ) {
        let mut cache = self.cache.write();
        match update(cache.balance) {
            Some(next) => {
                cache.balance = next;
                report_negative(&cache.balance, op);
            }
            None => {
                drop(cache);
                report_overflow(op, amount);
            }
        }
    }

    pub fn available(&self) -> Amount {
        self.cache.read().balance.available
    }

    /// Copy of the full triple.
    pub fn balance(&self) -> Balance {
        self.cache.read().balance
    }

    /// Time of the last successful sync.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.cache.read().last_sync
    }

    /// Seed the account: `total = available = amount`, nothing locked.
    pub fn set_initial_balance(&self, amount: Amount) {
        let mut cache = self.cache.write();
        cache.balance = Balance::funded(amount);
    }

    /// Sync once, then keep resyncing every `sync_interval` in the background.
    ///
    /// The first sync is awaited before returning; its failure is logged,
    /// not returned. The background loop exits when `cancel` fires and
    /// abandons a sync that is still in flight.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            result = self.sync() => {
                if let Err(e) = result {
                    warn!(error = %e, "Initial balance sync failed");
                }
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let period = this.sync_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_ms = period.as_millis() as u64,
                dry_run = this.is_dry_run(),
                "Balance sync loop started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = this.sync() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Balance sync failed");
                        }
                    }
                }
            }

            debug!("Balance sync loop stopped");
        })
    }
}

fn report_overflow(op: &'static str, amount: Amount) {
    Metrics::balance_overflow(op);
    warn!(op, amount = %amount, "Balance mutation overflows, ignored");
}

fn report_negative(balance: &Balance, op: &'static str) {
    for (field, value) in [
        ("available", balance.available),
        ("locked", balance.locked),
        ("total", balance.total),
    ] {
        if value.is_negative() {
            Metrics::balance_negative(field);
            warn!(op, field, value = %value, "Balance field went negative");
        }
    }
}
