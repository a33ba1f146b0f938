use async_trait::async_trait;

use canrelay_core::error::Result;

use crate::aggregate::{HealthStatus, RttSummary};
use crate::sink::{BusSample, ChannelSample, PairSample, Severity, TelemetrySink};

/// Sink that emits every call as a structured `tracing` record.
///
/// Default sink of the server binary; pair it with a log shipper or replace
/// it with a viewer-specific implementation.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn record_bus(&self, timestamp: u64, bus: &BusSample) -> Result<()> {
        tracing::info!(
            target: "canrelay::bus",
            timestamp,
            load = bus.load_percent,
            frames_total = bus.total_frames,
            active = bus.active_channels,
            errors_per_s = bus.error_frame_rate,
            drops_per_s = bus.dropped_frame_rate,
            "bus"
        );
        Ok(())
    }

    async fn record_rtt(&self, timestamp: u64, rtt: &RttSummary) -> Result<()> {
        tracing::info!(
            target: "canrelay::rtt",
            timestamp,
            mean_ms = rtt.mean,
            p95_ms = rtt.p95,
            pairs = rtt.pairs,
            weighted = rtt.weighted,
            "rtt"
        );
        Ok(())
    }

    async fn record_channel(&self, timestamp: u64, channel: &ChannelSample) -> Result<()> {
        tracing::debug!(
            target: "canrelay::channel",
            timestamp,
            channel = channel.channel,
            id = channel.display_id,
            label = %channel.label,
            fps = channel.sample_rate,
            jitter_p95_ms = channel.jitter_p95,
            jitter_mean_ms = ?channel.jitter_mean,
            "channel"
        );
        Ok(())
    }

    async fn record_pair(&self, timestamp: u64, pair: &PairSample) -> Result<()> {
        tracing::debug!(
            target: "canrelay::rtt",
            timestamp,
            pair = %pair.pair,
            label = %pair.label,
            mean_ms = pair.rtt_mean,
            p95_ms = pair.rtt_p95,
            loss = ?pair.loss_rate,
            "pair"
        );
        Ok(())
    }

    async fn record_status(&self, timestamp: u64, status: HealthStatus, message: &str) -> Result<()> {
        match status {
            HealthStatus::Nominal => {
                tracing::info!(target: "canrelay::status", timestamp, status = status.as_str(), "{message}")
            }
            HealthStatus::Warning => {
                tracing::warn!(target: "canrelay::status", timestamp, status = status.as_str(), "{message}")
            }
            HealthStatus::Error => {
                tracing::error!(target: "canrelay::status", timestamp, status = status.as_str(), "{message}")
            }
        }
        Ok(())
    }

    async fn log_event(&self, timestamp: u64, severity: Severity, message: &str) -> Result<()> {
        match severity {
            Severity::Info => tracing::info!(target: "canrelay::event", timestamp, "{message}"),
            Severity::Warning => tracing::warn!(target: "canrelay::event", timestamp, "{message}"),
            Severity::Error => tracing::error!(target: "canrelay::event", timestamp, "{message}"),
        }
        Ok(())
    }
}
