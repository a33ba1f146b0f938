#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::BTreeMap;
use std::sync::Arc;

use canrelay_core::protocol::{
    ChannelPair, Envelope, Event, EventType, Mapping, Message, MetricsSnapshot, PairRtt,
};
use canrelay_server::aggregate::{HealthStatus, Thresholds};
use canrelay_server::dispatch::{event_severity, ConnectionCtx, Dispatcher};
use canrelay_server::mapping::MappingResolver;
use canrelay_server::obs::RelayMetrics;
use canrelay_server::sink::{MemorySink, Severity, SinkRecord};

struct Fixture {
    sink: Arc<MemorySink>,
    metrics: Arc<RelayMetrics>,
    dispatcher: Dispatcher,
}

fn fixture() -> Fixture {
    let sink = Arc::new(MemorySink::new());
    let metrics = Arc::new(RelayMetrics::default());
    let dispatcher = Dispatcher::new(
        Arc::new(MappingResolver::new(BTreeMap::new())),
        sink.clone(),
        Thresholds::default(),
        metrics.clone(),
    );
    Fixture {
        sink,
        metrics,
        dispatcher,
    }
}

fn ctx() -> ConnectionCtx {
    ConnectionCtx::new(1, "127.0.0.1:40000".parse().unwrap())
}

fn snapshot(load: f64) -> MetricsSnapshot {
    let mut s = MetricsSnapshot {
        bus_load_percent: load,
        total_frames: 1000,
        active_channels: 2,
        ..Default::default()
    };
    s.pair_rtt.insert(
        ChannelPair::new(1, 17),
        PairRtt {
            rtt_mean: 2.1,
            rtt_p95: 3.5,
            sample_count: None,
            timeout_count: None,
        },
    );
    s
}

fn learned(pairs: &[(u32, &str)]) -> Mapping {
    Mapping {
        channel_to_numeric_id: BTreeMap::new(),
        channel_to_label: pairs.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn metrics_reach_every_sink_call() {
    let f = fixture();
    let mut c = ctx();

    let reply = f
        .dispatcher
        .dispatch(&mut c, Envelope::new(1, Message::Metrics(snapshot(25.5))))
        .await
        .unwrap();
    assert!(reply.is_none());

    let records = f.sink.records();
    assert!(matches!(records[0], SinkRecord::Bus(ref b) if b.load_percent == 25.5));
    assert_eq!(f.sink.rtt_summaries().len(), 1);
    assert!(records.iter().any(|r| matches!(r, SinkRecord::Pair(p) if p.label == "id_17")));
    assert_eq!(f.sink.statuses(), vec![HealthStatus::Nominal]);
    assert_eq!(c.last_status(), Some(HealthStatus::Nominal));
    assert_eq!(f.metrics.envelopes_received.get(&[("kind", "metrics")]), 1);
}

#[tokio::test]
async fn status_reported_only_on_change() {
    let f = fixture();
    let mut c = ctx();

    for load in [25.5, 30.0, 65.0, 66.0, 20.0] {
        f.dispatcher
            .dispatch(&mut c, Envelope::new(1, Message::Metrics(snapshot(load))))
            .await
            .unwrap();
    }
    assert_eq!(
        f.sink.statuses(),
        vec![HealthStatus::Nominal, HealthStatus::Warning, HealthStatus::Nominal]
    );
}

#[tokio::test]
async fn events_feed_the_next_classification_only() {
    let f = fixture();
    let mut c = ctx();

    let event = Event::new(EventType::Timeout, 0x11).with_detail("rtt_ms", 55.0);
    f.dispatcher.dispatch(&mut c, Envelope::new(1, Message::Event(event))).await.unwrap();
    f.dispatcher
        .dispatch(&mut c, Envelope::new(2, Message::Metrics(snapshot(10.0))))
        .await
        .unwrap();
    f.dispatcher
        .dispatch(&mut c, Envelope::new(3, Message::Metrics(snapshot(10.0))))
        .await
        .unwrap();

    assert_eq!(f.sink.statuses(), vec![HealthStatus::Error, HealthStatus::Nominal]);
}

#[tokio::test]
async fn event_log_line_uses_labels() {
    let f = fixture();
    let mut c = ctx();

    f.dispatcher
        .dispatch(&mut c, Envelope::new(1, Message::Mapping(learned(&[(0x11, "shoulder_response")]))))
        .await
        .unwrap();
    assert!(c.mapping_received());

    let event = Event::new(EventType::Timeout, 0x11).with_detail("rtt_ms", 55.0);
    f.dispatcher.dispatch(&mut c, Envelope::new(2, Message::Event(event))).await.unwrap();

    let events = f.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, Severity::Warning);
    assert_eq!(events[0].1, "[CAN] TIMEOUT ID=0x011 (shoulder_response) rtt_ms=55.0");
}

#[test]
fn severities() {
    assert_eq!(event_severity(EventType::Watchdog), Severity::Error);
    assert_eq!(event_severity(EventType::ErrorFrame), Severity::Error);
    assert_eq!(event_severity(EventType::HighTemperature), Severity::Warning);
    assert_eq!(event_severity(EventType::Drop), Severity::Warning);
}

#[tokio::test]
async fn ping_replies_with_effective_mapping() {
    let f = fixture();
    let mut c = ctx();
    f.dispatcher
        .dispatch(&mut c, Envelope::new(1, Message::Mapping(learned(&[(1, "shoulder_joint")]))))
        .await
        .unwrap();

    let reply = f
        .dispatcher
        .dispatch(&mut c, Envelope::new(2, Message::Ping))
        .await
        .unwrap()
        .expect("ping must be answered");
    match reply.message {
        Message::Mapping(m) => assert_eq!(m.channel_to_label[&1], "shoulder_joint"),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn unknown_kind_is_a_validation_error() {
    let f = fixture();
    let mut c = ctx();
    let err = f
        .dispatcher
        .dispatch(
            &mut c,
            Envelope::new(1, Message::Unknown { kind: "heartbeat".into() }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "VALIDATION");
    assert_eq!(f.metrics.unknown_kinds.get(&[("kind", "heartbeat")]), 1);
    assert!(f.sink.records().is_empty());
}

#[tokio::test]
async fn failing_sink_does_not_fail_dispatch() {
    let f = fixture();
    let mut c = ctx();
    f.sink.set_failing(true);

    f.dispatcher
        .dispatch(&mut c, Envelope::new(1, Message::Metrics(snapshot(25.5))))
        .await
        .unwrap();
    assert_eq!(f.metrics.sink_errors.get(&[("call", "record_bus")]), 1);
    assert_eq!(f.metrics.sink_errors.get(&[("call", "record_status")]), 1);
}
