//! Prometheus metrics for the tradecore engine.
//!
//! Covers:
//! - Event bus fan-out and drops
//! - Price cache size and evictions
//! - Balance sync, reservations and invariant violations
//! - Position fills and persistence failures
//! - Operation latency
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! (e.g. duplicate metric names) is a fatal configuration error and only
//! occurs during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, register_int_gauge, Counter,
    CounterVec, Encoder, HistogramVec, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Payloads offered to subscribers, per topic.
pub static BUS_PUBLISHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tc_bus_published_total",
        "Total payloads published on the event bus",
        &["topic"]
    )
    .unwrap()
});

/// Payloads dropped because a subscriber buffer was full or closed.
pub static BUS_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tc_bus_dropped_total",
        "Total payloads dropped for slow or closed subscribers",
        &["topic"]
    )
    .unwrap()
});

/// Symbols currently held in the price cache.
pub static PRICE_CACHE_ITEMS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tc_price_cache_items", "Symbols held in the price cache").unwrap()
});

/// Price cache evictions.
/// Labels: reason (stale/invalid)
pub static PRICE_CACHE_EVICTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tc_price_cache_evicted_total",
        "Total price cache entries evicted",
        &["reason"]
    )
    .unwrap()
});

/// Balance sync attempts.
/// Labels: result (ok/error/skipped)
pub static BALANCE_SYNC_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tc_balance_sync_total",
        "Total balance sync attempts against the exchange",
        &["result"]
    )
    .unwrap()
});

/// Reservations rejected for insufficient funds.
pub static BALANCE_LOCK_REJECTED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "tc_balance_lock_rejected_total",
        "Total balance lock requests rejected for insufficient funds"
    )
    .unwrap()
});

/// Mutations that left a balance field negative.
/// Labels: field (available/locked/total)
pub static BALANCE_NEGATIVE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tc_balance_negative_total",
        "Total balance mutations that drove a field negative",
        &["field"]
    )
    .unwrap()
});

/// Mutations refused because a field would overflow.
/// Labels: op (lock/unlock/deduct/add)
pub static BALANCE_OVERFLOW_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tc_balance_overflow_total",
        "Total balance mutations refused for decimal overflow",
        &["op"]
    )
    .unwrap()
});

/// Per-user balance managers currently registered.
pub static BALANCE_ACTIVE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tc_balance_active_users",
        "Per-user balance managers currently registered"
    )
    .unwrap()
});

/// Fills applied to positions.
pub static POSITION_FILLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tc_position_fills_total",
        "Total fills applied to positions",
        &["side"]
    )
    .unwrap()
});

/// Durable store writes that failed after the in-memory update.
pub static POSITION_PERSIST_FAILED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "tc_position_persist_failed_total",
        "Total position store writes that failed"
    )
    .unwrap()
});

/// Operation latency in milliseconds.
/// Labels: op (order/strategy/db)
pub static LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tc_latency_ms",
        "Operation latency in milliseconds",
        &["op"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 1000.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record a payload offered on a topic.
    pub fn bus_published(topic: &str) {
        BUS_PUBLISHED_TOTAL.with_label_values(&[topic]).inc();
    }

    /// Record a payload dropped for one subscriber.
    pub fn bus_dropped(topic: &str) {
        BUS_DROPPED_TOTAL.with_label_values(&[topic]).inc();
    }

    /// Set price cache item count.
    pub fn price_cache_items(count: usize) {
        PRICE_CACHE_ITEMS.set(count as i64);
    }

    /// Record price cache evictions.
    pub fn price_cache_evicted(reason: &str, count: usize) {
        if count > 0 {
            PRICE_CACHE_EVICTED_TOTAL
                .with_label_values(&[reason])
                .inc_by(count as f64);
        }
    }

    /// Record a balance sync outcome.
    pub fn balance_sync(result: &str) {
        BALANCE_SYNC_TOTAL.with_label_values(&[result]).inc();
    }

    /// Record a rejected balance lock.
    pub fn balance_lock_rejected() {
        BALANCE_LOCK_REJECTED_TOTAL.inc();
    }

    /// Record a balance field driven negative.
    pub fn balance_negative(field: &str) {
        BALANCE_NEGATIVE_TOTAL.with_label_values(&[field]).inc();
    }

    /// Record a balance mutation refused for overflow.
    pub fn balance_overflow(op: &str) {
        BALANCE_OVERFLOW_TOTAL.with_label_values(&[op]).inc();
    }

    /// Set registered per-user balance managers.
    pub fn balance_active_users(count: usize) {
        BALANCE_ACTIVE_USERS.set(count as i64);
    }

    /// Record a fill applied to a position.
    pub fn position_fill(side: &str) {
        POSITION_FILLS_TOTAL.with_label_values(&[side]).inc();
    }

    /// Record a failed position store write.
    pub fn position_persist_failed() {
        POSITION_PERSIST_FAILED_TOTAL.inc();
    }

    /// Record operation latency.
    pub fn latency(op: &str, latency_ms: f64) {
        LATENCY_MS.with_label_values(&[op]).observe(latency_ms);
    }

    /// Render the default registry in Prometheus text format.
    pub fn encode_text() -> TelemetryResult<String> {
        let families = prometheus::gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_metrics() {
        Metrics::bus_published("price_tick");
        Metrics::position_fill("buy");

        let text = Metrics::encode_text().unwrap();
        assert!(text.contains("tc_bus_published_total"));
        assert!(text.contains("tc_position_fills_total"));
    }

    #[test]
    fn test_evicted_zero_is_not_recorded() {
        let before = PRICE_CACHE_EVICTED_TOTAL
            .with_label_values(&["unit_test"])
            .get();
        Metrics::price_cache_evicted("unit_test", 0);
        Metrics::price_cache_evicted("unit_test", 3);
        let after = PRICE_CACHE_EVICTED_TOTAL
            .with_label_values(&["unit_test"])
            .get();
        assert_eq!(after - before, 3.0);
    }
}
