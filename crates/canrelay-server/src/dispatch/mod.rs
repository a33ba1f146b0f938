//! Dispatcher module exports.
//!
//! Re-exports the dispatcher and its per-connection context so downstream
//! consumers can depend on this module directly.

pub mod dispatcher;

pub use dispatcher::{event_severity, ConnectionCtx, Dispatcher};
