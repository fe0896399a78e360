//! Engine assembly and lifecycle.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tc_balance::{
    BalanceError, BalanceManager, DynBalanceSource, ManagerFactory, MultiUserBalanceManager,
};
use tc_bus::{Event, EventBus, Topic, Unsubscribe};
use tc_cache::{spawn_cleanup_task, ShardedPriceCache};
use tc_core::{Amount, SystemClock, UserId};
use tc_position::{DynPositionStore, StateManager};
use tc_telemetry::SystemMetrics;

use crate::config::EngineConfig;
use crate::consumers::{
    spawn_fill_consumer, spawn_price_consumer, spawn_risk_consumer, spawn_signal_consumer,
    FillContext,
};
use crate::error::EngineResult;

/// External collaborators injected into the engine.
pub struct EngineDeps {
    /// Durable position store.
    pub store: DynPositionStore,
    /// Exchange balance for the global account. Ignored in dry-run mode.
    pub balance_source: Option<DynBalanceSource>,
    /// Builds per-user managers. Defaults to dry-run managers seeded with
    /// `initial_balance` in dry-run mode and to an error otherwise.
    pub user_factory: Option<ManagerFactory>,
}

impl EngineDeps {
    pub fn new(store: DynPositionStore) -> Self {
        Self {
            store,
            balance_source: None,
            user_factory: None,
        }
    }
}

/// Running state engine.
pub struct Engine {
    config: EngineConfig,
    bus: EventBus<Event>,
    cache: Arc<ShardedPriceCache>,
    metrics: Arc<SystemMetrics>,
    balance: Arc<BalanceManager>,
    users: Arc<MultiUserBalanceManager>,
    state: Arc<StateManager>,
    cancel: CancellationToken,
    subscriptions: Vec<Unsubscribe<Event>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> EngineResult<Self> {
        config.validate()?;

        let metrics = Arc::new(SystemMetrics::new(config.metrics.histogram_size));
        let cache = Arc::new(ShardedPriceCache::with_shards(
            config.cache.shards,
            Arc::new(SystemClock),
        ));
        let state = Arc::new(
            StateManager::new(deps.store).with_db_latency(metrics.db_latency.clone()),
        );

        let initial = Amount::new(config.initial_balance);
        let sync_interval = config.balance.sync_interval();
        let source = if config.dry_run {
            None
        } else {
            deps.balance_source
        };
        if !config.dry_run && source.is_none() {
            warn!("Live mode without a balance source, global balance will not sync");
        }
        let balance = Arc::new(BalanceManager::new(source, sync_interval));
        balance.set_initial_balance(initial);

        let factory = deps
            .user_factory
            .unwrap_or_else(|| default_user_factory(config.dry_run, initial, sync_interval));
        let users = Arc::new(MultiUserBalanceManager::new(factory));

        Ok(Self {
            config,
            bus: EventBus::new(),
            cache,
            metrics,
            balance,
            users,
            state,
            cancel: CancellationToken::new(),
            subscriptions: Vec::new(),
            tasks: Vec::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus<Event> {
        &self.bus
    }

    pub fn cache(&self) -> &Arc<ShardedPriceCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<SystemMetrics> {
        &self.metrics
    }

    /// Global (single-tenant) balance manager.
    pub fn balance(&self) -> &Arc<BalanceManager> {
        &self.balance
    }

    pub fn users(&self) -> &Arc<MultiUserBalanceManager> {
        &self.users
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Load positions, subscribe consumers and start background tasks.
    pub async fn start(&mut self) -> EngineResult<()> {
        let loaded = self.state.load().await?;
        info!(positions = loaded, dry_run = self.config.dry_run, "Starting engine");

        let buffer = self.config.bus.buffer;
        let (ticks, unsub_ticks) = self.bus.subscribe(Topic::PriceTick, buffer);
        let (filled, unsub_filled) = self.bus.subscribe(Topic::OrderFilled, buffer);
        let (partial, unsub_partial) = self.bus.subscribe(Topic::OrderPartiallyFilled, buffer);
        let (signals, unsub_signals) = self.bus.subscribe(Topic::StrategySignal, buffer);
        let (alerts, unsub_alerts) = self.bus.subscribe(Topic::RiskAlert, buffer);
        self.subscriptions.extend([
            unsub_ticks,
            unsub_filled,
            unsub_partial,
            unsub_signals,
            unsub_alerts,
        ]);

        self.tasks.push(spawn_price_consumer(
            ticks,
            self.cache.clone(),
            self.metrics.clone(),
            self.cancel.child_token(),
        ));
        self.tasks.push(spawn_fill_consumer(
            filled,
            partial,
            FillContext {
                state: self.state.clone(),
                cache: self.cache.clone(),
                balance: self.balance.clone(),
                users: self.users.clone(),
                metrics: self.metrics.clone(),
                bus: self.bus.clone(),
            },
            self.cancel.child_token(),
        ));
        self.tasks.push(spawn_signal_consumer(
            signals,
            self.metrics.clone(),
            self.cancel.child_token(),
        ));
        self.tasks
            .push(spawn_risk_consumer(alerts, self.cancel.child_token()));

        let balance_sync = self.balance.start(self.cancel.child_token()).await;
        self.tasks.push(balance_sync);
        self.tasks.push(spawn_cleanup_task(
            self.cache.clone(),
            self.config.cache.cleanup_interval(),
            self.config.cache.max_age(),
            self.cancel.child_token(),
        ));
        let idle_cleanup = self.spawn_idle_cleanup();
        self.tasks.push(idle_cleanup);
        if self.config.metrics.snapshot_interval_secs > 0 {
            let snapshot_logger = self.spawn_snapshot_logger();
            self.tasks.push(snapshot_logger);
        }

        info!(tasks = self.tasks.len(), "Engine started");
        Ok(())
    }

    /// Start, then run until Ctrl-C or cancellation.
    pub async fn run(mut self) -> EngineResult<()> {
        self.start().await?;

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        for sub in self.subscriptions.drain(..) {
            let _ = sub.unsubscribe();
        }

        for result in join_all(self.tasks.drain(..)).await {
            if let Err(e) = result {
                error!(error = %e, "Engine task panicked");
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            orders = snapshot.orders_processed,
            ticks = snapshot.ticks_processed,
            errors = snapshot.errors,
            "Engine stopped"
        );
    }

    fn spawn_idle_cleanup(&self) -> JoinHandle<()> {
        let users = self.users.clone();
        let metrics = self.metrics.clone();
        let ttl = self.config.balance.idle_ttl();
        let period = self.config.balance.cleanup_interval();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        users.cleanup_idle(ttl);
                        metrics.set_balance_active_users(users.user_count());
                    }
                }
            }
        })
    }

    fn spawn_snapshot_logger(&self) -> JoinHandle<()> {
        let metrics = self.metrics.clone();
        let cache = self.cache.clone();
        let period = Duration::from_secs(self.config.metrics.snapshot_interval_secs);
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = metrics.snapshot();
                        let stats = cache.stats();
                        info!(
                            orders = snapshot.orders_processed,
                            ticks = snapshot.ticks_processed,
                            signals = snapshot.signals_generated,
                            errors = snapshot.errors,
                            users = snapshot.balance_active_users,
                            order_p99_ms = snapshot.order_latency.p99,
                            db_p99_ms = snapshot.db_latency.p99,
                            cached_prices = stats.total_items,
                            oldest_price_ms = stats.oldest_age.as_millis() as u64,
                            "Metrics snapshot"
                        );
                    }
                }
            }
        })
    }
}

fn default_user_factory(dry_run: bool, initial: Amount, sync_interval: Duration) -> ManagerFactory {
    if dry_run {
        Box::new(move |_user: &UserId| {
            let manager = BalanceManager::new(None, sync_interval);
            manager.set_initial_balance(initial);
            Ok(Arc::new(manager))
        })
    } else {
        Box::new(|user: &UserId| {
            Err(BalanceError::Factory(format!(
                "no balance source configured for user {user}"
            )))
        })
    }
}
