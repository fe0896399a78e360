//! Engine-wide latency histograms and throughput counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::histogram::{LatencyHistogram, LatencyStats};
use crate::metrics::Metrics;

/// Tracks overall engine performance.
///
/// Histograms are shared (`Arc`) so latency-sensitive components can hold
/// the one they write to without holding the whole `SystemMetrics`.
#[derive(Debug)]
pub struct SystemMetrics {
    pub order_latency: Arc<LatencyHistogram>,
    pub strategy_latency: Arc<LatencyHistogram>,
    pub db_latency: Arc<LatencyHistogram>,

    orders_processed: AtomicU64,
    ticks_processed: AtomicU64,
    signals_generated: AtomicU64,
    errors: AtomicU64,
    balance_active_users: AtomicUsize,
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub order_latency: LatencyStats,
    pub strategy_latency: LatencyStats,
    pub db_latency: LatencyStats,
    pub orders_processed: u64,
    pub ticks_processed: u64,
    pub signals_generated: u64,
    pub errors: u64,
    pub balance_active_users: usize,
    pub timestamp: DateTime<Utc>,
}

impl SystemMetrics {
    /// Create metrics with histograms of `histogram_size` samples each.
    #[must_use]
    pub fn new(histogram_size: usize) -> Self {
        Self {
            order_latency: Arc::new(LatencyHistogram::new(histogram_size)),
            strategy_latency: Arc::new(LatencyHistogram::new(histogram_size)),
            db_latency: Arc::new(LatencyHistogram::new(histogram_size)),
            orders_processed: AtomicU64::new(0),
            ticks_processed: AtomicU64::new(0),
            signals_generated: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            balance_active_users: AtomicUsize::new(0),
        }
    }

    pub fn increment_orders(&self) {
        self.orders_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ticks(&self) {
        self.ticks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_signals(&self) {
        self.signals_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the count of registered per-user balance managers.
    pub fn set_balance_active_users(&self, count: usize) {
        self.balance_active_users.store(count, Ordering::Relaxed);
        Metrics::balance_active_users(count);
    }

    /// Point-in-time snapshot. Histogram stats are computed lazily.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            order_latency: self.order_latency.stats(),
            strategy_latency: self.strategy_latency.stats(),
            db_latency: self.db_latency.stats(),
            orders_processed: self.orders_processed.load(Ordering::Relaxed),
            ticks_processed: self.ticks_processed.load(Ordering::Relaxed),
            signals_generated: self.signals_generated.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            balance_active_users: self.balance_active_users.load(Ordering::Relaxed),
            timestamp: Utc::now(),
        }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new(crate::histogram::DEFAULT_WINDOW_SIZE)
    }
}

/// Measures an operation and records it into a histogram on `stop`.
///
/// The elapsed time is also observed into the Prometheus `tc_latency_ms`
/// histogram under `op`.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    histogram: Option<Arc<LatencyHistogram>>,
    op: &'static str,
}

impl Timer {
    #[must_use]
    pub fn start(histogram: Option<Arc<LatencyHistogram>>, op: &'static str) -> Self {
        Self {
            start: Instant::now(),
            histogram,
            op,
        }
    }

    /// Record elapsed time and return it.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(h) = &self.histogram {
            h.record_duration(elapsed);
        }
        Metrics::latency(self.op, elapsed.as_secs_f64() * 1000.0);
        elapsed
    }
}
