//! Relay metrics registry.
//!
//! Every metric is a `Family`: a `DashMap` from a sorted label set to one
//! atomic cell, so connection tasks update counters without a global lock.
//! Rendering follows the Prometheus text format; an empty label set renders
//! without braces.

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

/// Sorted `(name, value)` pairs identifying one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    fn from_pairs(labels: &[(&str, &str)]) -> Self {
        let mut pairs: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        pairs.sort();
        Self(pairs)
    }

    fn render(&self, extra: Option<(&str, &str)>) -> String {
        let mut parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", escape(v)))
            .collect();
        if let Some((k, v)) = extra {
            parts.push(format!("{k}=\"{v}\""));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", parts.join(","))
        }
    }
}

fn escape(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// One metric name with any number of labeled series.
struct Family<C> {
    series: DashMap<LabelSet, C>,
}

impl<C: Default> Default for Family<C> {
    fn default() -> Self {
        Self {
            series: DashMap::new(),
        }
    }
}

impl<C: Default> Family<C> {
    fn with<R>(&self, labels: &[(&str, &str)], f: impl FnOnce(&C) -> R) -> R {
        let cell = self.series.entry(LabelSet::from_pairs(labels)).or_default();
        f(&cell)
    }

    fn peek<R>(&self, labels: &[(&str, &str)], f: impl FnOnce(&C) -> R) -> Option<R> {
        self.series.get(&LabelSet::from_pairs(labels)).map(|c| f(&c))
    }

    /// Series sorted by label set so output is stable between scrapes.
    fn sorted<R>(&self, f: impl Fn(&C) -> R) -> Vec<(LabelSet, R)> {
        let mut rows: Vec<(LabelSet, R)> = self
            .series
            .iter()
            .map(|e| (e.key().clone(), f(e.value())))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Monotonic counter.
#[derive(Default)]
pub struct CounterVec(Family<AtomicU64>);

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        self.0.with(labels, |c| c.fetch_add(v, Ordering::Relaxed));
    }

    /// Value for an exact label set; 0 if never touched.
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.0
            .peek(labels, |c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        header(out, name, help, "counter");
        for (labels, v) in self.0.sorted(|c| c.load(Ordering::Relaxed)) {
            let _ = writeln!(out, "{name}{} {v}", labels.render(None));
        }
    }
}

/// Up/down gauge.
#[derive(Default)]
pub struct GaugeVec(Family<AtomicI64>);

impl GaugeVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn dec(&self, labels: &[(&str, &str)]) {
        self.add(labels, -1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        self.0.with(labels, |g| g.fetch_add(v, Ordering::Relaxed));
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.0
            .peek(labels, |g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        header(out, name, help, "gauge");
        for (labels, v) in self.0.sorted(|g| g.load(Ordering::Relaxed)) {
            let _ = writeln!(out, "{name}{} {v}", labels.render(None));
        }
    }
}

/// Upper bounds (µs) for dispatch latency. Dispatch includes awaiting the
/// sink, so the range reaches half a second.
const DISPATCH_BUCKETS_MICROS: [u64; 8] = [50, 250, 1_000, 5_000, 25_000, 100_000, 250_000, 500_000];

#[derive(Default)]
struct Buckets {
    count: AtomicU64,
    sum_micros: AtomicU64,
    le: [AtomicU64; DISPATCH_BUCKETS_MICROS.len()],
}

/// Latency histogram with fixed microsecond buckets.
#[derive(Default)]
pub struct HistogramVec(Family<Buckets>);

impl HistogramVec {
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.0.with(labels, |h| {
            h.count.fetch_add(1, Ordering::Relaxed);
            h.sum_micros.fetch_add(micros, Ordering::Relaxed);
            for (bound, cell) in DISPATCH_BUCKETS_MICROS.iter().zip(&h.le) {
                if micros <= *bound {
                    cell.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        self.0
            .peek(labels, |h| h.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        header(out, name, help, "histogram");
        let rows = self.0.sorted(|h| {
            let le: Vec<u64> = h.le.iter().map(|c| c.load(Ordering::Relaxed)).collect();
            (le, h.count.load(Ordering::Relaxed), h.sum_micros.load(Ordering::Relaxed))
        });
        for (labels, (le, count, sum)) in rows {
            for (bound, n) in DISPATCH_BUCKETS_MICROS.iter().zip(le) {
                let bound = bound.to_string();
                let _ = writeln!(out, "{name}_bucket{} {n}", labels.render(Some(("le", bound.as_str()))));
            }
            let _ = writeln!(out, "{name}_bucket{} {count}", labels.render(Some(("le", "+Inf"))));
            let _ = writeln!(out, "{name}_sum{} {sum}", labels.render(None));
            let _ = writeln!(out, "{name}_count{} {count}", labels.render(None));
        }
    }
}

/// Every counter the relay server keeps.
#[derive(Default)]
pub struct RelayMetrics {
    pub connections_accepted: CounterVec,
    pub connections_active: GaugeVec,
    /// label: reason
    pub connections_closed: CounterVec,
    /// label: kind
    pub envelopes_received: CounterVec,
    pub protocol_errors: CounterVec,
    /// label: kind
    pub unknown_kinds: CounterVec,
    /// label: call
    pub sink_errors: CounterVec,
    pub mapping_pings_sent: CounterVec,
    /// label: kind
    pub dispatch_duration: HistogramVec,
}

impl RelayMetrics {
    /// Prometheus text for every metric, followed by caller-supplied gauges.
    pub fn render(&self, extra: &[(&str, u64)]) -> String {
        let mut out = String::new();
        self.connections_accepted.render(
            "canrelay_connections_accepted_total",
            "Producer connections accepted.",
            &mut out,
        );
        self.connections_active.render(
            "canrelay_connections_active",
            "Producer connections currently open.",
            &mut out,
        );
        self.connections_closed.render(
            "canrelay_connections_closed_total",
            "Producer connections closed, by reason.",
            &mut out,
        );
        self.envelopes_received.render(
            "canrelay_envelopes_received_total",
            "Decoded envelopes, by kind.",
            &mut out,
        );
        self.protocol_errors.render(
            "canrelay_protocol_errors_total",
            "Connections closed on an unframeable or undecodable envelope.",
            &mut out,
        );
        self.unknown_kinds.render(
            "canrelay_unknown_kinds_total",
            "Envelopes ignored for an unknown kind.",
            &mut out,
        );
        self.sink_errors.render(
            "canrelay_sink_errors_total",
            "Failed sink calls, by call.",
            &mut out,
        );
        self.mapping_pings_sent.render(
            "canrelay_mapping_pings_sent_total",
            "Mapping requests sent after the grace period.",
            &mut out,
        );
        self.dispatch_duration.render(
            "canrelay_dispatch_duration_micros",
            "Time to dispatch one envelope, sink calls included.",
            &mut out,
        );

        for (name, v) in extra {
            let _ = writeln!(out, "# TYPE {name} gauge");
            let _ = writeln!(out, "{name} {v}");
        }
        out
    }
}
