//! canrelay server library entry.
//!
//! This crate wires the TCP transport, dispatcher, aggregator/classifier,
//! mapping resolver and sink boundary into a relay server. It is consumed by
//! the binary (`main.rs`) and by integration tests.

pub mod aggregate;
pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod mapping;
pub mod obs;
pub mod ops;
pub mod router;
pub mod server;
pub mod sink;
pub mod transport;

pub use app_state::RelayState;
pub use config::RelayConfig;
pub use server::RelayServer;
