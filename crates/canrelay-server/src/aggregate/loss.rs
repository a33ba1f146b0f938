use std::collections::HashMap;

use canrelay_core::protocol::{ChannelPair, PairRtt};

/// Per-connection loss-rate tracker.
///
/// Producers report cumulative `timeout_count` / `sample_count` per pair; the
/// loss rate for a window is `Δtimeouts / max(1, Δtimeouts + Δsamples)`.
/// A counter that goes backwards (producer restart) contributes a zero delta.
#[derive(Debug, Default)]
pub struct LossTracker {
    last: HashMap<ChannelPair, (u64, u64)>,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the pair carries neither counter.
    pub fn observe(&mut self, pair: ChannelPair, rtt: &PairRtt) -> Option<f64> {
        if rtt.timeout_count.is_none() && rtt.sample_count.is_none() {
            return None;
        }
        let timeouts = rtt.timeout_count.unwrap_or(0);
        let samples = rtt.sample_count.unwrap_or(0);

        let (prev_timeouts, prev_samples) = self
            .last
            .insert(pair, (timeouts, samples))
            .unwrap_or((0, 0));

        let d_timeouts = timeouts.saturating_sub(prev_timeouts);
        let d_samples = samples.saturating_sub(prev_samples);
        let denom = d_timeouts.saturating_add(d_samples).max(1);
        Some(d_timeouts as f64 / denom as f64)
    }
}
