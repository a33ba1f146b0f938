//! Lightweight in-process metrics.
//!
//! Counters are stored as atomics and rendered in Prometheus text format by
//! the `/metrics` ops handler.

pub mod metrics;

pub use metrics::RelayMetrics;
