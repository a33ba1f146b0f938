#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::BTreeMap;

use canrelay_client::{Outbox, Outgoing};
use canrelay_core::protocol::{Envelope, Event, EventType, Mapping, Message, MetricsSnapshot};

fn event(channel: u32) -> Envelope {
    Envelope::event(Event::new(EventType::Timeout, channel))
}

fn metrics(load: f64) -> Envelope {
    Envelope::metrics(MetricsSnapshot {
        bus_load_percent: load,
        ..Default::default()
    })
}

fn mapping(label: &str) -> Envelope {
    let mut channel_to_label = BTreeMap::new();
    channel_to_label.insert(1, label.to_string());
    Envelope::mapping(Mapping {
        channel_to_numeric_id: BTreeMap::new(),
        channel_to_label,
        ..Default::default()
    })
}

fn describe(item: Outgoing) -> String {
    match &item.envelope().message {
        Message::Event(e) => format!("event:{}", e.channel_id),
        Message::Metrics(m) => format!("metrics:{}", m.bus_load_percent),
        Message::Mapping(m) => format!("mapping:{}", m.channel_to_label[&1]),
        Message::Ping => "ping".to_string(),
        Message::Unknown { kind } => format!("unknown:{kind}"),
    }
}

fn drain(outbox: &mut Outbox) -> Vec<String> {
    std::iter::from_fn(|| outbox.next()).map(describe).collect()
}

#[test]
fn metrics_dropped_while_disconnected() {
    let mut outbox = Outbox::new(8);
    outbox.push(metrics(10.0));
    outbox.push(metrics(20.0));

    assert_eq!(outbox.dropped_metrics(), 2);
    assert!(!outbox.has_pending());
}

#[test]
fn metrics_slot_is_latest_wins() {
    let mut outbox = Outbox::new(8);
    outbox.on_connected();
    outbox.push(metrics(10.0));
    outbox.push(metrics(20.0));

    assert_eq!(drain(&mut outbox), vec!["metrics:20"]);
    assert_eq!(outbox.dropped_metrics(), 1);
}

#[test]
fn disconnect_clears_metrics_slot() {
    let mut outbox = Outbox::new(8);
    outbox.on_connected();
    outbox.push(metrics(10.0));
    outbox.on_disconnected();

    assert!(drain(&mut outbox).is_empty());
    assert_eq!(outbox.dropped_metrics(), 1);
}

#[test]
fn event_ring_drops_oldest() {
    let mut outbox = Outbox::new(3);
    for ch in 1..=5 {
        outbox.push(event(ch));
    }

    assert_eq!(outbox.dropped_events(), 2);
    assert_eq!(drain(&mut outbox), vec!["event:3", "event:4", "event:5"]);
}

#[test]
fn events_queued_while_disconnected_go_before_metrics() {
    let mut outbox = Outbox::new(8);
    outbox.push(event(1));
    outbox.push(event(2));
    outbox.on_connected();
    outbox.push(metrics(30.0));
    outbox.push(Envelope::ping());

    assert_eq!(drain(&mut outbox), vec!["event:1", "event:2", "ping", "metrics:30"]);
}

#[test]
fn failed_event_goes_back_to_front() {
    let mut outbox = Outbox::new(8);
    outbox.on_connected();
    outbox.push(event(1));
    outbox.push(event(2));

    let first = outbox.next().unwrap();
    outbox.requeue(first);
    assert_eq!(drain(&mut outbox), vec!["event:1", "event:2"]);
    assert_eq!(outbox.dropped_events(), 0);
}

#[test]
fn mapping_resent_on_every_connect() {
    let mut outbox = Outbox::new(8);
    outbox.push(mapping("old"));
    outbox.push(mapping("shoulder_joint"));
    outbox.push(event(7));

    outbox.on_connected();
    assert_eq!(drain(&mut outbox), vec!["mapping:shoulder_joint", "event:7"]);

    outbox.on_disconnected();
    outbox.on_connected();
    assert_eq!(drain(&mut outbox), vec!["mapping:shoulder_joint"]);

    assert!(outbox.resend_mapping());
    assert_eq!(drain(&mut outbox), vec!["mapping:shoulder_joint"]);
}
