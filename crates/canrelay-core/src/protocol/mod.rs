//! Protocol modules.
//!
//! - `envelope`: the `{kind, timestamp, payload}` envelope and its closed
//!   `Message` variant type.
//! - `payload`: kind-specific payload schemas (metrics snapshot, event,
//!   mapping).
//! - `frame`: newline-delimited framing over a byte stream.
//!
//! All parsers are panic-free: malformed input is reported as `RelayError`
//! instead of panicking, so one bad peer cannot take a process down.

pub mod envelope;
pub mod frame;
pub mod payload;

pub use envelope::{Envelope, Message, MessageKind, Timestamp};
pub use frame::{decode_frame, encode_frame, LineFramer, DEFAULT_MAX_FRAME_BYTES};
pub use payload::{
    ChannelPair, ChannelStats, Event, EventType, Mapping, MetricsSnapshot, PairRtt,
};
