//! Snapshot aggregation and health classification.
//!
//! Everything here is a pure function of its inputs except `LossTracker`,
//! which a connection owns to difference cumulative counters.

mod classify;
mod loss;
mod rtt;

use canrelay_core::protocol::{EventType, MetricsSnapshot};

pub use classify::{classify, status_message, HealthStatus, Thresholds};
pub use loss::LossTracker;
pub use rtt::{aggregate_rtt, RttSummary};

/// Derived view of one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub rtt: Option<RttSummary>,
    pub status: HealthStatus,
    pub message: String,
}

pub fn analyze(snapshot: &MetricsSnapshot, events: &[EventType], t: &Thresholds) -> Analysis {
    let status = classify(snapshot, events, t);
    Analysis {
        rtt: aggregate_rtt(snapshot),
        status,
        message: status_message(status, snapshot),
    }
}
