//! Relay envelope (JSON).
//!
//! Wire shape: `{"kind": "...", "timestamp": <u64 ns>, "payload": {...}}`.
//! Decoding is two-step: the outer header is parsed with the payload held as
//! `RawValue`, then the payload is parsed exhaustively by `kind`. Unknown
//! kinds are not an error here; they surface as `Message::Unknown` so the
//! receiver decides what to do with them.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{RelayError, Result};
use crate::protocol::payload::{Event, Mapping, MetricsSnapshot};

/// Known envelope kinds plus a bucket for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Metrics,
    Event,
    Mapping,
    Ping,
    Unknown,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Metrics => "metrics",
            MessageKind::Event => "event",
            MessageKind::Mapping => "mapping",
            MessageKind::Ping => "ping",
            MessageKind::Unknown => "unknown",
        }
    }
}

/// Decoded envelope body, one case per `kind`.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Metrics(MetricsSnapshot),
    Event(Event),
    Mapping(Mapping),
    Ping,
    /// A kind this build does not know. The payload is not retained.
    Unknown { kind: String },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Metrics(_) => MessageKind::Metrics,
            Message::Event(_) => MessageKind::Event,
            Message::Mapping(_) => MessageKind::Mapping,
            Message::Ping => MessageKind::Ping,
            Message::Unknown { .. } => MessageKind::Unknown,
        }
    }

    fn wire_kind(&self) -> &str {
        match self {
            Message::Unknown { kind } => kind,
            other => other.kind().as_str(),
        }
    }
}

/// One relay envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Monotonic nanoseconds, see [`Timestamp::now`].
    pub timestamp: u64,
    pub message: Message,
}

impl Envelope {
    pub fn new(timestamp: u64, message: Message) -> Self {
        Self { timestamp, message }
    }

    /// Stamp `message` with the current process timestamp.
    pub fn now(message: Message) -> Self {
        Self::new(Timestamp::now(), message)
    }

    pub fn metrics(snapshot: MetricsSnapshot) -> Self {
        Self::now(Message::Metrics(snapshot))
    }

    pub fn event(event: Event) -> Self {
        Self::now(Message::Event(event))
    }

    pub fn mapping(mapping: Mapping) -> Self {
        Self::now(Message::Mapping(mapping))
    }

    pub fn ping() -> Self {
        Self::now(Message::Ping)
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Serialize to compact JSON (no framing).
    pub fn to_json(&self) -> Result<String> {
        let payload = match &self.message {
            Message::Metrics(m) => PayloadRef::Metrics(m),
            Message::Event(e) => PayloadRef::Event(e),
            Message::Mapping(m) => PayloadRef::Mapping(m),
            Message::Ping | Message::Unknown { .. } => PayloadRef::Empty(Empty {}),
        };
        let wire = WireEnvelope {
            kind: self.message.wire_kind(),
            timestamp: self.timestamp,
            payload,
        };
        serde_json::to_string(&wire)
            .map_err(|e| RelayError::Internal(format!("envelope encode failed: {e}")))
    }

    /// Parse one envelope from JSON text (no framing).
    pub fn from_json(s: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(s)
            .map_err(|e| RelayError::Protocol(format!("invalid envelope json: {e}")))?;

        let kind = raw
            .kind
            .ok_or_else(|| RelayError::Protocol("envelope missing kind".into()))?;
        let timestamp = raw
            .timestamp
            .ok_or_else(|| RelayError::Protocol("envelope missing timestamp".into()))?;

        let message = match kind.as_str() {
            "metrics" => Message::Metrics(parse_payload(&kind, raw.payload.as_deref())?),
            "event" => Message::Event(parse_payload(&kind, raw.payload.as_deref())?),
            "mapping" => Message::Mapping(parse_payload(&kind, raw.payload.as_deref())?),
            "ping" => Message::Ping,
            _ => Message::Unknown { kind },
        };

        Ok(Self { timestamp, message })
    }
}

/// Parse a known kind's payload. A missing payload parses as `{}`.
fn parse_payload<T: for<'de> Deserialize<'de>>(kind: &str, raw: Option<&RawValue>) -> Result<T> {
    let text = raw.map(RawValue::get).unwrap_or("{}");
    serde_json::from_str(text)
        .map_err(|e| RelayError::Protocol(format!("{kind} payload invalid: {e}")))
}

/// Header view used while decoding; payload parsing is deferred.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default)]
    payload: Option<Box<RawValue>>,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    kind: &'a str,
    timestamp: u64,
    payload: PayloadRef<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadRef<'a> {
    Metrics(&'a MetricsSnapshot),
    Event(&'a Event),
    Mapping(&'a Mapping),
    Empty(Empty),
}

#[derive(Serialize)]
struct Empty {}

/// Process-wide monotonic nanosecond clock.
///
/// Anchored to wall-clock time once, then advanced by `Instant`, so values
/// are comparable across processes on one host yet never go backwards.
pub struct Timestamp;

impl Timestamp {
    pub fn now() -> u64 {
        static ANCHOR: OnceLock<(Instant, u64)> = OnceLock::new();
        let (start, wall_ns) = ANCHOR.get_or_init(|| {
            let wall = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            (Instant::now(), u64::try_from(wall).unwrap_or(u64::MAX))
        });
        let elapsed = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        wall_ns.saturating_add(elapsed)
    }
}
