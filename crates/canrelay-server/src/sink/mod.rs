//! Visualization sink boundary.
//!
//! The server never renders or persists anything itself; it hands derived
//! values to a `TelemetrySink`. Calls are fire-and-forget from the server's
//! point of view: an `Err` is logged and counted, never propagated.

mod memory;
mod tracing_sink;

use async_trait::async_trait;

use canrelay_core::error::Result;
use canrelay_core::protocol::ChannelPair;

use crate::aggregate::{HealthStatus, RttSummary};

pub use memory::{MemorySink, SinkRecord};
pub use tracing_sink::TracingSink;

/// Severity tag attached to event-log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

/// Bus-wide scalars from one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BusSample {
    pub load_percent: f64,
    pub total_frames: u64,
    pub active_channels: u32,
    pub error_frame_rate: f64,
    pub dropped_frame_rate: f64,
}

/// One request/response pair, already labeled.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSample {
    pub pair: ChannelPair,
    pub label: String,
    pub rtt_mean: f64,
    pub rtt_p95: f64,
    /// Present when the producer reports cumulative counters.
    pub loss_rate: Option<f64>,
}

/// One channel's frame statistics, already labeled.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSample {
    pub channel: u32,
    pub display_id: u32,
    pub label: String,
    pub sample_rate: f64,
    pub jitter_p95: f64,
    pub jitter_mean: Option<f64>,
}

/// Consumer of processed telemetry (dashboard, time-series viewer, log).
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record_bus(&self, timestamp: u64, bus: &BusSample) -> Result<()>;

    async fn record_rtt(&self, timestamp: u64, rtt: &RttSummary) -> Result<()>;

    async fn record_channel(&self, timestamp: u64, channel: &ChannelSample) -> Result<()>;

    async fn log_event(&self, timestamp: u64, severity: Severity, message: &str) -> Result<()>;

    async fn record_pair(&self, _timestamp: u64, _pair: &PairSample) -> Result<()> {
        Ok(())
    }

    /// Called only when the classified status changes on a connection.
    async fn record_status(&self, _timestamp: u64, _status: HealthStatus, _message: &str) -> Result<()> {
        Ok(())
    }
}
