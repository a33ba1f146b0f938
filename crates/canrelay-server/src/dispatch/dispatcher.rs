use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde_json::Value;

use canrelay_core::error::{RelayError, Result};
use canrelay_core::protocol::{Envelope, Event, EventType, Mapping, Message, MetricsSnapshot};

use crate::aggregate::{analyze, HealthStatus, LossTracker, Thresholds};
use crate::mapping::MappingResolver;
use crate::obs::RelayMetrics;
use crate::sink::{BusSample, ChannelSample, PairSample, Severity, TelemetrySink};

/// Per-connection dispatch state. Never shared between connections.
#[derive(Debug)]
pub struct ConnectionCtx {
    pub conn_id: u64,
    pub peer: SocketAddr,
    /// Event types seen since the last metrics classification.
    pending_events: Vec<EventType>,
    loss: LossTracker,
    last_status: Option<HealthStatus>,
    last_total_frames: Option<u64>,
    mapping_received: bool,
}

impl ConnectionCtx {
    pub fn new(conn_id: u64, peer: SocketAddr) -> Self {
        Self {
            conn_id,
            peer,
            pending_events: Vec::new(),
            loss: LossTracker::new(),
            last_status: None,
            last_total_frames: None,
            mapping_received: false,
        }
    }

    pub fn mapping_received(&self) -> bool {
        self.mapping_received
    }

    pub fn last_status(&self) -> Option<HealthStatus> {
        self.last_status
    }
}

/// Severity attached to each event type in the event log.
pub fn event_severity(event_type: EventType) -> Severity {
    match event_type {
        EventType::Timeout => Severity::Warning,
        EventType::ErrorFrame => Severity::Error,
        EventType::HighTemperature => Severity::Warning,
        EventType::Watchdog => Severity::Error,
        EventType::Drop => Severity::Warning,
    }
}

/// Routes decoded envelopes to the aggregator, the resolver and the sink.
pub struct Dispatcher {
    resolver: Arc<MappingResolver>,
    sink: Arc<dyn TelemetrySink>,
    thresholds: Thresholds,
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    pub fn new(
        resolver: Arc<MappingResolver>,
        sink: Arc<dyn TelemetrySink>,
        thresholds: Thresholds,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            resolver,
            sink,
            thresholds,
            metrics,
        }
    }

    pub fn resolver(&self) -> &Arc<MappingResolver> {
        &self.resolver
    }

    /// Handle one envelope. Returns a reply to write back on the same
    /// connection, if the kind calls for one.
    ///
    /// `Err(Validation)` means the envelope was ignored; the caller keeps the
    /// connection open.
    pub async fn dispatch(&self, ctx: &mut ConnectionCtx, env: Envelope) -> Result<Option<Envelope>> {
        let kind = env.kind();
        self.metrics.envelopes_received.inc(&[("kind", kind.as_str())]);
        let started = Instant::now();

        let reply = match env.message {
            Message::Metrics(snapshot) => {
                self.on_metrics(ctx, env.timestamp, &snapshot).await;
                None
            }
            Message::Event(event) => {
                self.on_event(ctx, env.timestamp, &event).await;
                None
            }
            Message::Mapping(mapping) => {
                self.on_mapping(ctx, mapping);
                None
            }
            Message::Ping => {
                tracing::debug!(conn_id = ctx.conn_id, "ping received, replying with mapping");
                Some(Envelope::mapping(self.resolver.effective()))
            }
            Message::Unknown { kind } => {
                self.metrics.unknown_kinds.inc(&[("kind", kind.as_str())]);
                return Err(RelayError::Validation(format!("unknown envelope kind: {kind}")));
            }
        };

        self.metrics
            .dispatch_duration
            .observe(&[("kind", kind.as_str())], started.elapsed());
        Ok(reply)
    }

    async fn on_metrics(&self, ctx: &mut ConnectionCtx, ts: u64, snapshot: &MetricsSnapshot) {
        if let Some(prev) = ctx.last_total_frames {
            if snapshot.total_frames < prev {
                tracing::warn!(
                    conn_id = ctx.conn_id,
                    prev,
                    now = snapshot.total_frames,
                    "total_frames went backwards; producer counter reset?"
                );
            }
        }
        ctx.last_total_frames = Some(snapshot.total_frames);

        let events = std::mem::take(&mut ctx.pending_events);
        let analysis = analyze(snapshot, &events, &self.thresholds);

        let bus = BusSample {
            load_percent: snapshot.bus_load_percent,
            total_frames: snapshot.total_frames,
            active_channels: snapshot.active_channels,
            error_frame_rate: snapshot.error_frame_rate,
            dropped_frame_rate: snapshot.dropped_frame_rate,
        };
        self.fire("record_bus", self.sink.record_bus(ts, &bus).await);

        if let Some(rtt) = &analysis.rtt {
            self.fire("record_rtt", self.sink.record_rtt(ts, rtt).await);
        }

        let pairs: Vec<PairSample> = snapshot
            .pair_rtt
            .iter()
            .map(|(pair, stats)| PairSample {
                pair: *pair,
                label: self.resolver.pair_label(*pair),
                rtt_mean: stats.rtt_mean,
                rtt_p95: stats.rtt_p95,
                loss_rate: ctx.loss.observe(*pair, stats),
            })
            .collect();
        for res in join_all(pairs.iter().map(|p| self.sink.record_pair(ts, p))).await {
            self.fire("record_pair", res);
        }

        let channels: Vec<ChannelSample> = snapshot
            .channels
            .iter()
            .map(|(id, stats)| ChannelSample {
                channel: *id,
                display_id: self.resolver.display_id(*id),
                label: self.resolver.label(*id),
                sample_rate: stats.sample_rate,
                jitter_p95: stats.jitter_p95,
                jitter_mean: stats.jitter_mean,
            })
            .collect();
        for res in join_all(channels.iter().map(|c| self.sink.record_channel(ts, c))).await {
            self.fire("record_channel", res);
        }

        if ctx.last_status != Some(analysis.status) {
            tracing::info!(
                conn_id = ctx.conn_id,
                status = analysis.status.as_str(),
                "bus status changed"
            );
            ctx.last_status = Some(analysis.status);
            self.fire(
                "record_status",
                self.sink.record_status(ts, analysis.status, &analysis.message).await,
            );
        }
    }

    async fn on_event(&self, ctx: &mut ConnectionCtx, ts: u64, event: &Event) {
        ctx.pending_events.push(event.event_type);
        let severity = event_severity(event.event_type);
        let message = self.event_message(event);
        tracing::debug!(conn_id = ctx.conn_id, severity = severity.as_str(), "{message}");
        self.fire("log_event", self.sink.log_event(ts, severity, &message).await);
    }

    fn on_mapping(&self, ctx: &mut ConnectionCtx, mapping: Mapping) {
        tracing::info!(
            conn_id = ctx.conn_id,
            labels = mapping.channel_to_label.len(),
            ids = mapping.channel_to_numeric_id.len(),
            "learned channel mapping replaced"
        );
        ctx.mapping_received = true;
        self.resolver.replace_learned(mapping);
    }

    /// `[CAN] TIMEOUT ID=0x011 (shoulder_response) rtt_ms=55.0`
    fn event_message(&self, event: &Event) -> String {
        let mut message = format!(
            "[CAN] {} ID=0x{:03X} ({})",
            event.event_type.as_str().to_uppercase(),
            event.channel_id,
            self.resolver.label(event.channel_id)
        );
        for (k, v) in &event.details {
            match v {
                Value::String(s) => message.push_str(&format!(" {k}={s}")),
                other => message.push_str(&format!(" {k}={other}")),
            }
        }
        message
    }

    fn fire(&self, call: &'static str, res: Result<()>) {
        if let Err(e) = res {
            self.metrics.sink_errors.inc(&[("call", call)]);
            tracing::warn!(call, error = %e, "sink call failed");
        }
    }
}
