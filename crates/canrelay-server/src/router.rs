//! Axum router wiring for the ops listener.
//!
//! The relay protocol itself runs on raw TCP; HTTP is only used for
//! liveness and metrics scraping.

use axum::{routing::get, Router};

use crate::{app_state::RelayState, ops};

pub fn build_ops_router(state: RelayState) -> Router {
    Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/metrics", get(ops::metrics))
        .with_state(state)
}
