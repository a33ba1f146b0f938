//! canrelay server binary.
//!
//! - Config: `$CANRELAY_CONFIG` or `./canrelay.yaml` (strict parsing + validate)
//! - Relay listener on `server.host:server.port`
//! - Optional ops listener (`/healthz`, `/metrics`)
//! - Runs until Ctrl-C / SIGTERM, then stops both

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use canrelay_core::error::{RelayError, Result};
use canrelay_server::{config, router, sink::TracingSink, RelayServer};

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let path = std::env::var("CANRELAY_CONFIG").unwrap_or_else(|_| "canrelay.yaml".to_string());
    let cfg = config::load_from_file(&path)?;
    let ops_addr = cfg.ops.listen_addr()?;
    let port = cfg.server.port;

    let server = RelayServer::new(cfg, Arc::new(TracingSink::new()))?;
    server.start(port).await?;

    let (ops_stop, mut ops_stop_rx) = watch::channel(false);
    let ops_task = match ops_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| RelayError::Configuration(format!("ops bind {addr} failed: {e}")))?;
            tracing::info!(%addr, "ops endpoint listening");
            let app = router::build_ops_router(server.state().clone());
            Some(tokio::spawn(async move {
                let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = ops_stop_rx.changed().await;
                });
                if let Err(e) = serve.await {
                    tracing::warn!(error = %e, "ops endpoint exited with error");
                }
            }))
        }
        None => None,
    };

    shutdown_signal().await;

    server.stop().await;
    let _ = ops_stop.send(true);
    if let Some(task) = ops_task {
        let _ = task.await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, stopping relay");
}
