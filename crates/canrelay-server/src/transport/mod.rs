//! Transport layer (TCP, newline-delimited JSON).
//!
//! Exposes the per-connection loop that decodes frames once before they reach
//! the dispatcher.

pub mod connection;

pub use connection::CloseReason;
