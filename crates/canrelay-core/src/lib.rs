//! canrelay core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the wire-level contracts and error surface shared by the
//! relay server and the relay client. It intentionally carries no transport or
//! runtime dependencies so both sides (and test tooling) can reuse it.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `RelayError`/`Result` so neither side
//! crashes on malformed input from the other.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, Result, RelayError};
pub use protocol::{
    decode_frame, encode_frame, ChannelPair, ChannelStats, Envelope, Event, EventType, LineFramer,
    Mapping, Message, MessageKind, MetricsSnapshot, PairRtt, Timestamp,
};
