//! Encode/decode symmetry for the line framing.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::BTreeMap;

use canrelay_core::protocol::{
    decode_frame, encode_frame, ChannelPair, ChannelStats, Envelope, Event, EventType, Mapping,
    Message, MetricsSnapshot, PairRtt,
};

fn snapshot() -> MetricsSnapshot {
    let mut channels = BTreeMap::new();
    channels.insert(
        1,
        ChannelStats {
            sample_rate: 200.0,
            jitter_p95: 0.25,
            jitter_mean: Some(0.125),
        },
    );
    channels.insert(17, ChannelStats { sample_rate: 199.5, jitter_p95: 0.5, jitter_mean: None });

    let mut pair_rtt = BTreeMap::new();
    pair_rtt.insert(
        ChannelPair::new(1, 17),
        PairRtt { rtt_mean: 2.1, rtt_p95: 3.5, sample_count: Some(120), timeout_count: Some(2) },
    );
    pair_rtt.insert(
        ChannelPair::new(2, 18),
        PairRtt { rtt_mean: 4.1, rtt_p95: 5.5, sample_count: None, timeout_count: None },
    );

    MetricsSnapshot {
        bus_load_percent: 25.5,
        error_frame_rate: 0.5,
        dropped_frame_rate: 0.25,
        total_frames: 123_456,
        active_channels: 6,
        channels,
        pair_rtt,
    }
}

#[test]
fn metrics_snapshot_roundtrip() {
    let env = Envelope::new(1_700_000_000_123_456_789, Message::Metrics(snapshot()));
    let frame = encode_frame(&env).unwrap();
    assert_eq!(frame.last(), Some(&b'\n'));
    assert_eq!(frame.iter().filter(|b| **b == b'\n').count(), 1);
    assert_eq!(decode_frame(&frame).unwrap(), env);
}

#[test]
fn envelope_field_names_are_stable() {
    let env = Envelope::new(11, Message::Ping);
    let json: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
    assert_eq!(json["kind"], "ping");
    assert_eq!(json["timestamp"], 11);
    assert!(json["payload"].is_object());

    let pair_key = Envelope::new(1, Message::Metrics(snapshot())).to_json().unwrap();
    assert!(pair_key.contains("\"1:17\""));
}

#[test]
fn event_details_with_newlines_stay_on_one_line() {
    let event = Event::new(EventType::Watchdog, 3).with_detail("note", "line one\nline two");
    let env = Envelope::new(5, Message::Event(event));
    let frame = encode_frame(&env).unwrap();
    assert_eq!(frame.iter().filter(|b| **b == b'\n').count(), 1);
    assert_eq!(decode_frame(&frame).unwrap(), env);
}

#[test]
fn mapping_roundtrip() {
    let mut mapping = Mapping::default();
    mapping.channel_to_label.insert(1, "shoulder_joint".into());
    mapping.channel_to_numeric_id.insert(1, 3);
    let env = Envelope::new(8, Message::Mapping(mapping));
    assert_eq!(decode_frame(&encode_frame(&env).unwrap()).unwrap(), env);
}

#[test]
fn timestamps_do_not_go_backwards() {
    let a = Envelope::ping().timestamp;
    let b = Envelope::ping().timestamp;
    assert!(b >= a);
    assert!(a > 0);
}

/// xorshift64*, so the sweep is reproducible without a rand dependency.
struct Xorshift(u64);

impl Xorshift {
    fn next_f64(&mut self, scale: f64) -> f64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        let bits = self.0.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
        (bits as f64 / (1u64 << 53) as f64) * scale
    }
}

#[test]
fn arbitrary_floats_survive_the_wire() {
    let mut rng = Xorshift(0x9E37_79B9_7F4A_7C15);

    for i in 0..20_000u32 {
        let mut s = snapshot();
        s.bus_load_percent = rng.next_f64(100.0);
        s.error_frame_rate = rng.next_f64(10.0);
        s.dropped_frame_rate = rng.next_f64(1.0);
        s.channels.insert(
            i % 64,
            ChannelStats {
                sample_rate: rng.next_f64(1000.0),
                jitter_p95: rng.next_f64(100.0),
                jitter_mean: Some(rng.next_f64(100.0)),
            },
        );
        s.pair_rtt.insert(
            ChannelPair::new(i % 8, 16 + i % 8),
            PairRtt {
                rtt_mean: rng.next_f64(50.0),
                rtt_p95: rng.next_f64(50.0),
                sample_count: Some(u64::from(i)),
                timeout_count: Some(u64::MAX - u64::from(i)),
            },
        );

        let env = Envelope::new(u64::from(i), Message::Metrics(s));
        let back = decode_frame(&encode_frame(&env).unwrap()).unwrap();
        assert_eq!(back, env, "iteration {i}");
    }
}

#[test]
fn known_hard_float_is_exact() {
    let mut s = snapshot();
    s.bus_load_percent = 39.430133835633676;
    let env = Envelope::new(1, Message::Metrics(s));
    assert_eq!(decode_frame(&encode_frame(&env).unwrap()).unwrap(), env);
}

#[test]
fn mapping_keeps_request_response_pairing() {
    let line = br#"{"kind":"mapping","timestamp":9,"payload":{"channel_to_label":{"1":"shoulder_joint"},"can_id_map":{"1":17,"2":18}}}"#;
    let env = decode_frame(line).unwrap();
    let Message::Mapping(mapping) = env.message else {
        panic!("expected mapping, got {:?}", env.message);
    };
    assert_eq!(mapping.can_id_map.get(&1), Some(&17));
    assert_eq!(mapping.can_id_map.get(&2), Some(&18));
    assert!(mapping.channel_to_numeric_id.is_empty());

    let unpaired = Envelope::new(10, Message::Mapping(Mapping::default()));
    assert!(!unpaired.to_json().unwrap().contains("can_id_map"));
}
