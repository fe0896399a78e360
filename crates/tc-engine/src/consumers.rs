//! Bus consumers: price ticks, fills, strategy signals and risk alerts.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tc_balance::{BalanceManager, MultiUserBalanceManager};
use tc_bus::{Event, EventBus, FillEvent, RiskAlert, Topic};
use tc_cache::ShardedPriceCache;
use tc_core::{Position, Price, Side, UserId};
use tc_position::StateManager;
use tc_telemetry::{SystemMetrics, Timer};

/// Everything the fill path touches.
#[derive(Clone)]
pub struct FillContext {
    pub state: Arc<StateManager>,
    pub cache: Arc<ShardedPriceCache>,
    pub balance: Arc<BalanceManager>,
    pub users: Arc<MultiUserBalanceManager>,
    pub metrics: Arc<SystemMetrics>,
    pub bus: EventBus<Event>,
}

async fn next_event(
    rx: &mut mpsc::Receiver<Event>,
    cancel: &CancellationToken,
) -> Option<Event> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        event = rx.recv() => event,
    }
}

/// Feed `PriceTick` events into the price cache.
pub fn spawn_price_consumer(
    mut rx: mpsc::Receiver<Event>,
    cache: Arc<ShardedPriceCache>,
    metrics: Arc<SystemMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut rx, &cancel).await {
            if let Event::PriceTick(tick) = event {
                cache.set(tick.symbol, tick.price);
                metrics.increment_ticks();
            }
        }
        debug!("Price consumer stopped");
    })
}

/// Apply fills from both the filled and partially-filled topics.
///
/// One task drains both receivers so fills are applied one at a time.
pub fn spawn_fill_consumer(
    mut filled: mpsc::Receiver<Event>,
    mut partially_filled: mpsc::Receiver<Event>,
    ctx: FillContext,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = filled.recv() => event,
                event = partially_filled.recv() => event,
            };
            match event {
                Some(Event::Fill(fill)) => {
                    handle_fill(&ctx, fill).await;
                }
                Some(_) => {}
                None => break,
            }
        }
        debug!("Fill consumer stopped");
    })
}

/// Count strategy signals and time their handling.
pub fn spawn_signal_consumer(
    mut rx: mpsc::Receiver<Event>,
    metrics: Arc<SystemMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut rx, &cancel).await {
            if let Event::StrategySignal(signal) = event {
                let timer = Timer::start(Some(metrics.strategy_latency.clone()), "strategy");
                debug!(
                    strategy = %signal.strategy,
                    symbol = %signal.symbol,
                    side = %signal.side,
                    qty = %signal.qty,
                    "Strategy signal"
                );
                timer.stop();
                metrics.increment_signals();
            }
        }
        debug!("Signal consumer stopped");
    })
}

/// Log risk alerts.
pub fn spawn_risk_consumer(
    mut rx: mpsc::Receiver<Event>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut rx, &cancel).await {
            if let Event::RiskAlert(alert) = event {
                match &alert.user_id {
                    Some(user) => warn!(user = %user, message = %alert.message, "Risk alert"),
                    None => warn!(message = %alert.message, "Risk alert"),
                }
            }
        }
        debug!("Risk consumer stopped");
    })
}

/// Record a fill, settle its notional and announce the new position.
///
/// Returns `None` when the fill was skipped (no usable price, an
/// overflowing notional, or rejected by the state manager).
pub async fn handle_fill(ctx: &FillContext, fill: FillEvent) -> Option<Position> {
    let timer = Timer::start(Some(ctx.metrics.order_latency.clone()), "order");

    let Some(price) = resolve_price(ctx, &fill) else {
        warn!(symbol = %fill.symbol, order_id = %fill.order_id, "Fill has no usable price, skipped");
        ctx.metrics.increment_errors();
        ctx.bus.publish(
            Topic::RiskAlert,
            Event::RiskAlert(RiskAlert::new(
                fill.user_id.clone(),
                format!("fill {} for {} has no price", fill.order_id, fill.symbol),
            )),
        );
        timer.stop();
        return None;
    };

    let Some(notional) = fill.qty.notional(price) else {
        warn!(
            symbol = %fill.symbol,
            order_id = %fill.order_id,
            qty = %fill.qty,
            price = %price,
            "Fill notional overflows, skipped"
        );
        ctx.metrics.increment_errors();
        ctx.bus.publish(
            Topic::RiskAlert,
            Event::RiskAlert(RiskAlert::new(
                fill.user_id.clone(),
                format!("fill {} for {} overflows notional", fill.order_id, fill.symbol),
            )),
        );
        timer.stop();
        return None;
    };

    let applied = match ctx
        .state
        .record_fill(fill.user_id.as_ref(), &fill.symbol, fill.side, fill.qty, price)
        .await
    {
        Ok(applied) => applied,
        Err(e) => {
            warn!(symbol = %fill.symbol, order_id = %fill.order_id, error = %e, "Fill rejected");
            ctx.metrics.increment_errors();
            timer.stop();
            return None;
        }
    };

    if let Some(pnl) = applied.realized_pnl {
        info!(
            symbol = %fill.symbol,
            side = %fill.side,
            pnl = %pnl,
            "Realized PnL"
        );
    }
    let position = applied.position;

    let manager = settlement_manager(ctx, fill.user_id.as_ref());
    match fill.side {
        Side::Buy => manager.deduct(notional),
        Side::Sell => manager.add(notional),
    }

    if position.is_flat() {
        info!(symbol = %fill.symbol, "Position closed");
    } else {
        debug!(
            symbol = %fill.symbol,
            qty = %position.qty,
            avg_price = %position.avg_price,
            "Position updated"
        );
    }

    ctx.bus
        .publish(Topic::PositionChange, Event::PositionChange(position.clone()));
    ctx.metrics.increment_orders();
    timer.stop();
    Some(position)
}

/// Venue price, or the cached market price when the venue reported none.
fn resolve_price(ctx: &FillContext, fill: &FillEvent) -> Option<Price> {
    if fill.price.is_positive() {
        return Some(fill.price);
    }
    let cached = ctx.cache.get(fill.symbol.as_str()).filter(Price::is_positive)?;
    info!(symbol = %fill.symbol, price = %cached, "Using cached price for fill");
    Some(cached)
}

/// The user's own manager, falling back to the global one.
fn settlement_manager(ctx: &FillContext, user: Option<&UserId>) -> Arc<BalanceManager> {
    let Some(user) = user else {
        return Arc::clone(&ctx.balance);
    };
    match ctx.users.get_or_create(user) {
        Ok(manager) => {
            ctx.metrics.set_balance_active_users(ctx.users.user_count());
            manager
        }
        Err(e) => {
            warn!(user = %user, error = %e, "Per-user balance manager unavailable, using global");
            Arc::clone(&ctx.balance)
        }
    }
}
