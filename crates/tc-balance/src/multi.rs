//! Per-user registry of balance managers.
//!
//! Managers are created lazily through an injected factory the first time
//! a user is seen and evicted after a configurable idle period. The
//! registry lock only guards map lookups and inserts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tc_core::{Balance, Clock, SystemClock, UserId};
use tc_telemetry::Metrics;

use crate::error::BalanceResult;
use crate::manager::BalanceManager;

/// Builds the manager for a user seen for the first time.
pub type ManagerFactory =
    Box<dyn Fn(&UserId) -> BalanceResult<Arc<BalanceManager>> + Send + Sync>;

struct Entry {
    manager: Arc<BalanceManager>,
    last_seen_ms: AtomicU64,
}

pub struct MultiUserBalanceManager {
    users: RwLock<HashMap<UserId, Entry>>,
    factory: ManagerFactory,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MultiUserBalanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiUserBalanceManager")
            .field("users", &self.user_count())
            .finish()
    }
}

impl MultiUserBalanceManager {
    pub fn new(factory: ManagerFactory) -> Self {
        Self::with_clock(factory, Arc::new(SystemClock))
    }

    pub fn with_clock(factory: ManagerFactory, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            factory,
            clock,
        }
    }

    /// Manager for `user`, creating it through the factory on first use.
    ///
    /// Refreshes the user's last-seen time on every call. Concurrent first
    /// calls for the same user invoke the factory exactly once. A factory
    /// error is returned and nothing is registered.
    pub fn get_or_create(&self, user: &UserId) -> BalanceResult<Arc<BalanceManager>> {
        let now = self.clock.now_ms();

        if let Some(entry) = self.users.read().get(user) {
            entry.last_seen_ms.store(now, Ordering::Relaxed);
            return Ok(Arc::clone(&entry.manager));
        }

        let mut users = self.users.write();
        if let Some(entry) = users.get(user) {
            entry.last_seen_ms.store(now, Ordering::Relaxed);
            return Ok(Arc::clone(&entry.manager));
        }

        let manager = (self.factory)(user)?;
        users.insert(
            user.clone(),
            Entry {
                manager: Arc::clone(&manager),
                last_seen_ms: AtomicU64::new(now),
            },
        );
        let count = users.len();
        drop(users);

        Metrics::balance_active_users(count);
        info!(user = %user, users = count, "Balance manager created");
        Ok(manager)
    }

    /// Existing manager for `user`. Does not refresh last-seen.
    pub fn get(&self, user: &UserId) -> Option<Arc<BalanceManager>> {
        self.users
            .read()
            .get(user)
            .map(|e| Arc::clone(&e.manager))
    }

    /// Unregister a user. Returns whether one was removed.
    ///
    /// A background loop started for the manager keeps running until its
    /// cancellation token fires.
    pub fn remove(&self, user: &UserId) -> bool {
        let mut users = self.users.write();
        let removed = users.remove(user).is_some();
        let count = users.len();
        drop(users);

        if removed {
            Metrics::balance_active_users(count);
            debug!(user = %user, "Balance manager removed");
        }
        removed
    }

    /// Start every registered manager's sync loop.
    ///
    /// Managers registered after this call are not started.
    pub async fn start_all(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let managers: Vec<Arc<BalanceManager>> = self
            .users
            .read()
            .values()
            .map(|e| Arc::clone(&e.manager))
            .collect();

        let mut handles = Vec::with_capacity(managers.len());
        for manager in &managers {
            handles.push(manager.start(cancel.child_token()).await);
        }
        handles
    }

    /// Balance snapshot of every registered user.
    pub fn all_balances(&self) -> HashMap<UserId, Balance> {
        let managers: Vec<(UserId, Arc<BalanceManager>)> = self
            .users
            .read()
            .iter()
            .map(|(u, e)| (u.clone(), Arc::clone(&e.manager)))
            .collect();

        managers
            .into_iter()
            .map(|(u, m)| (u, m.balance()))
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    /// Evict users not seen for longer than `ttl`. A zero `ttl` is a no-op.
    ///
    /// Returns the number evicted.
    pub fn cleanup_idle(&self, ttl: Duration) -> usize {
        if ttl.is_zero() {
            return 0;
        }
        let cutoff = self.clock.now_ms().saturating_sub(ttl.as_millis() as u64);

        let mut users = self.users.write();
        let before = users.len();
        users.retain(|_, e| e.last_seen_ms.load(Ordering::Relaxed) >= cutoff);
        let removed = before - users.len();
        let count = users.len();
        drop(users);

        if removed > 0 {
            Metrics::balance_active_users(count);
            info!(removed, remaining = count, "Evicted idle balance managers");
        }
        removed
    }
}
