//! Kind-specific payload schemas.
//!
//! Map keys are channel ids (`u32`), which JSON carries as strings. Channel
//! pairs use the string key `"send:recv"`; the tuple form `"(send, recv)"`
//! emitted by older producers is accepted on decode.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::RelayError;

/// Per-channel frame statistics over one aggregation window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Frames per second observed in the window.
    #[serde(default)]
    pub sample_rate: f64,
    /// 95th percentile of inter-frame interval deviation (ms).
    #[serde(default)]
    pub jitter_p95: f64,
    /// Mean inter-frame interval deviation (ms), when the producer computes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_mean: Option<f64>,
}

/// Round-trip statistics for one request/response channel pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairRtt {
    #[serde(default)]
    pub rtt_mean: f64,
    #[serde(default)]
    pub rtt_p95: f64,
    /// Completed round trips (cumulative per connection).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<u64>,
    /// Requests that never saw a response (cumulative per connection).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_count: Option<u64>,
}

/// Ordered `(send, recv)` channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelPair {
    pub send: u32,
    pub recv: u32,
}

impl ChannelPair {
    pub fn new(send: u32, recv: u32) -> Self {
        Self { send, recv }
    }
}

impl fmt::Display for ChannelPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.send, self.recv)
    }
}

impl FromStr for ChannelPair {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed);

        let (send, recv) = inner
            .split_once(':')
            .or_else(|| inner.split_once(','))
            .ok_or_else(|| RelayError::Protocol(format!("invalid channel pair: {s}")))?;

        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| RelayError::Protocol(format!("invalid channel pair {s}: {e}")))
        };

        Ok(Self {
            send: parse(send)?,
            recv: parse(recv)?,
        })
    }
}

impl Serialize for ChannelPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairVisitor;

        impl<'de> Visitor<'de> for PairVisitor {
            type Value = ChannelPair;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a channel pair such as \"1:17\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ChannelPair, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(PairVisitor)
    }
}

/// One periodic sample of aggregated bus health statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Bus load, 0–100.
    #[serde(default)]
    pub bus_load_percent: f64,
    /// Error frames per second.
    #[serde(default)]
    pub error_frame_rate: f64,
    /// Dropped frames per second.
    #[serde(default)]
    pub dropped_frame_rate: f64,
    /// Monotonic frame counter (non-decreasing within one connection).
    #[serde(default)]
    pub total_frames: u64,
    #[serde(default)]
    pub active_channels: u32,
    #[serde(default)]
    pub channels: BTreeMap<u32, ChannelStats>,
    #[serde(default)]
    pub pair_rtt: BTreeMap<ChannelPair, PairRtt>,
}

/// Discrete anomaly kinds reported by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Timeout,
    ErrorFrame,
    #[serde(alias = "high_temp")]
    HighTemperature,
    Watchdog,
    Drop,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Timeout => "timeout",
            EventType::ErrorFrame => "error_frame",
            EventType::HighTemperature => "high_temperature",
            EventType::Watchdog => "watchdog",
            EventType::Drop => "drop",
        }
    }

    /// Terminal events force an ERROR classification on their own.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::Timeout | EventType::Watchdog)
    }
}

/// Payload of an `event` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub channel_id: u32,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
}

impl Event {
    pub fn new(event_type: EventType, channel_id: u32) -> Self {
        Self {
            event_type,
            channel_id,
            details: BTreeMap::new(),
        }
    }

    /// Attach one detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Payload of a `mapping` envelope. Need not be complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default)]
    pub channel_to_numeric_id: BTreeMap<u32, u32>,
    #[serde(default)]
    pub channel_to_label: BTreeMap<u32, String>,
    /// Request channel → response channel.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub can_id_map: BTreeMap<u32, u32>,
}

impl Mapping {
    pub fn is_empty(&self) -> bool {
        self.channel_to_numeric_id.is_empty()
            && self.channel_to_label.is_empty()
            && self.can_id_map.is_empty()
    }
}
