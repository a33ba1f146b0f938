use canrelay_core::protocol::MetricsSnapshot;

/// Bus-wide round-trip summary derived from per-pair statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttSummary {
    pub mean: f64,
    pub p95: f64,
    /// Number of pairs that contributed.
    pub pairs: usize,
    /// True when pairs were weighted by `sample_count`.
    pub weighted: bool,
}

/// Combine every pair's mean/p95 into one bus-wide figure.
///
/// Pairs are weighted by `sample_count` only when every pair carries a
/// positive count; otherwise each pair counts once. `None` when the snapshot
/// has no pairs.
pub fn aggregate_rtt(snapshot: &MetricsSnapshot) -> Option<RttSummary> {
    if snapshot.pair_rtt.is_empty() {
        return None;
    }

    let weights: Option<Vec<f64>> = snapshot
        .pair_rtt
        .values()
        .map(|p| p.sample_count.filter(|n| *n > 0).map(|n| n as f64))
        .collect();

    let weighted = weights.is_some();
    let weights = weights.unwrap_or_else(|| vec![1.0; snapshot.pair_rtt.len()]);
    let total: f64 = weights.iter().sum();

    let (mean, p95) = snapshot
        .pair_rtt
        .values()
        .zip(&weights)
        .fold((0.0, 0.0), |(mean, p95), (pair, w)| {
            (mean + pair.rtt_mean * w, p95 + pair.rtt_p95 * w)
        });

    Some(RttSummary {
        mean: mean / total,
        p95: p95 / total,
        pairs: snapshot.pair_rtt.len(),
        weighted,
    })
}
