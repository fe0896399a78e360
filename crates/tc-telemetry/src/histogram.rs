//! Sliding-window latency histogram with lazily recomputed statistics.
//!
//! Samples are recorded far more often than stats are read (a periodic
//! monitoring scrape), so `record` only appends and marks the window dirty.
//! `stats` sorts a copy of the window at most once per burst of writes and
//! serves the cached snapshot until the next `record`.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Window size used when a histogram is created with size 0.
pub const DEFAULT_WINDOW_SIZE: usize = 1000;

/// Computed latency statistics (milliseconds).
///
/// `count == 0` means "no data", not a zero latency.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

impl LatencyStats {
    /// Whether any samples contributed to these stats.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

#[derive(Debug)]
struct Window {
    samples: VecDeque<f64>,
    max_size: usize,
    /// Whether samples changed since `cached` was computed.
    dirty: bool,
    cached: LatencyStats,
}

/// Bounded FIFO window of latency samples.
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: Mutex<Window>,
}

impl LatencyHistogram {
    /// Create a histogram holding at most `max_size` samples.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let max_size = if max_size == 0 {
            DEFAULT_WINDOW_SIZE
        } else {
            max_size
        };
        Self {
            inner: Mutex::new(Window {
                samples: VecDeque::with_capacity(max_size),
                max_size,
                dirty: true,
                cached: LatencyStats::default(),
            }),
        }
    }

    /// Record a latency sample in milliseconds.
    ///
    /// When the window is full the oldest sample is evicted first.
    pub fn record(&self, latency_ms: f64) {
        let mut w = self.inner.lock();
        if w.samples.len() >= w.max_size {
            w.samples.pop_front();
        }
        w.samples.push_back(latency_ms);
        w.dirty = true;
    }

    /// Record a duration, converted to fractional milliseconds.
    pub fn record_duration(&self, d: Duration) {
        self.record(d.as_nanos() as f64 / 1e6);
    }

    /// Current statistics over the window.
    pub fn stats(&self) -> LatencyStats {
        let mut w = self.inner.lock();
        if !w.dirty {
            return w.cached;
        }

        let n = w.samples.len();
        if n == 0 {
            w.cached = LatencyStats::default();
            w.dirty = false;
            return w.cached;
        }

        let mut sorted: Vec<f64> = w.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = sorted.iter().sum();
        w.cached = LatencyStats {
            min: sorted[0],
            max: sorted[n - 1],
            avg: sum / n as f64,
            p50: sorted[n / 2],
            p95: sorted[nearest_rank(n, 0.95)],
            p99: sorted[nearest_rank(n, 0.99)],
            count: n,
        };
        w.dirty = false;
        w.cached
    }

    /// Number of samples currently in the window.
    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().samples.is_empty()
    }

    /// Maximum window size.
    pub fn capacity(&self) -> usize {
        self.inner.lock().max_size
    }

    /// Copy of the raw window, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.inner.lock().samples.iter().copied().collect()
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// `floor(n * p)`, clamped into the window.
fn nearest_rank(n: usize, p: f64) -> usize {
    ((n as f64 * p) as usize).min(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats_are_zeroed() {
        let h = LatencyHistogram::new(10);
        let s = h.stats();
        assert_eq!(s, LatencyStats::default());
        assert!(!s.has_data());
    }

    #[test]
    fn test_stats_basic() {
        let h = LatencyHistogram::new(100);
        for v in 1..=100 {
            h.record(v as f64);
        }

        let s = h.stats();
        assert_eq!(s.count, 100);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 100.0);
        assert_eq!(s.avg, 50.5);
        // sorted[50], sorted[95], sorted[99]
        assert_eq!(s.p50, 51.0);
        assert_eq!(s.p95, 96.0);
        assert_eq!(s.p99, 100.0);
    }

    #[test]
    fn test_single_sample_percentiles() {
        let h = LatencyHistogram::new(10);
        h.record(7.5);
        let s = h.stats();
        assert_eq!(s.count, 1);
        assert_eq!(s.p50, 7.5);
        assert_eq!(s.p95, 7.5);
        assert_eq!(s.p99, 7.5);
    }

    #[test]
    fn test_cached_stats_identical_without_record() {
        let h = LatencyHistogram::new(50);
        for v in [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0] {
            h.record(v);
        }

        let first = h.stats();
        let second = h.stats();
        assert_eq!(first.min.to_bits(), second.min.to_bits());
        assert_eq!(first.avg.to_bits(), second.avg.to_bits());
        assert_eq!(first.p99.to_bits(), second.p99.to_bits());
        assert_eq!(first, second);

        h.record(2.5);
        let third = h.stats();
        assert_eq!(third.count, first.count + 1);
    }

    #[test]
    fn test_window_keeps_most_recent() {
        let max = 5;
        let h = LatencyHistogram::new(max);
        for v in 0..(max + 3) {
            h.record(v as f64);
        }

        assert_eq!(h.len(), max);
        assert_eq!(h.samples(), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(h.stats().min, 3.0);
    }

    #[test]
    fn test_zero_size_falls_back_to_default() {
        let h = LatencyHistogram::new(0);
        assert_eq!(h.capacity(), DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn test_record_duration_in_ms() {
        let h = LatencyHistogram::new(10);
        h.record_duration(Duration::from_micros(2500));
        assert_eq!(h.stats().max, 2.5);
    }
}
