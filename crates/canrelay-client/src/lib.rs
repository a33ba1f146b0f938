//! canrelay client.
//!
//! Runs inside the producing process: keeps one logical connection to the
//! relay server alive, queues outgoing envelopes by kind and reconnects on a
//! fixed interval after any transport failure.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod config;
pub mod queue;
pub mod state;

pub use client::RelayClient;
pub use config::ClientConfig;
pub use queue::{Outbox, Outgoing};
pub use state::ConnectionState;
