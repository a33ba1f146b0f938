//! Top-level facade crate for canrelay.
//!
//! Re-exports the protocol core, the relay server and the relay client so
//! users can depend on a single crate.

pub mod core {
    pub use canrelay_core::*;
}

pub mod server {
    pub use canrelay_server::*;
}

pub mod client {
    pub use canrelay_client::*;
}
