//! Latency histograms, Prometheus metrics and structured logging.
//!
//! - [`LatencyHistogram`]: sliding-window latency samples with lazily cached stats
//! - [`SystemMetrics`]: engine-wide latency histograms and throughput counters
//! - [`Metrics`]: facade over the registered Prometheus collectors
//! - [`init_logging`]: tracing subscriber setup

pub mod error;
pub mod histogram;
pub mod logging;
pub mod metrics;
pub mod system;

pub use error::{TelemetryError, TelemetryResult};
pub use histogram::{LatencyHistogram, LatencyStats, DEFAULT_WINDOW_SIZE};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use system::{MetricsSnapshot, SystemMetrics, Timer};
