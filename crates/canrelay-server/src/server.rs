//! Relay server lifecycle: listen, accept, stop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Duration};
use tracing::Instrument;

use canrelay_core::error::{RelayError, Result};

use crate::app_state::RelayState;
use crate::config::RelayConfig;
use crate::mapping::MappingResolver;
use crate::obs::RelayMetrics;
use crate::sink::TelemetrySink;
use crate::transport::connection::serve_connection;

/// How long `stop()` waits for connection tasks before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Back-off after a failed `accept` (e.g. fd exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// Accepts producer connections and dispatches their envelopes.
pub struct RelayServer {
    state: RelayState,
    running: Mutex<Option<Running>>,
}

impl RelayServer {
    /// Build a server; loads the static mapping layer from `cfg.mapping`.
    pub fn new(cfg: RelayConfig, sink: Arc<dyn TelemetrySink>) -> Result<Self> {
        Ok(Self::from_state(RelayState::new(cfg, sink)?))
    }

    pub fn from_state(state: RelayState) -> Self {
        Self {
            state,
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    pub fn resolver(&self) -> Arc<MappingResolver> {
        self.state.resolver()
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.state.metrics()
    }

    /// Bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Listen on `server.host:port` (0 picks an ephemeral port).
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(RelayError::Configuration("relay server already started".into()));
        }

        let host = self.state.cfg().server.host.clone();
        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| RelayError::Configuration(format!("bind {host}:{port} failed: {e}")))?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = self.state.clone();
        let accept_task = tokio::spawn(accept_loop(state, listener, shutdown_rx));

        tracing::info!(%local_addr, "relay server listening");
        *running = Some(Running {
            local_addr,
            shutdown: shutdown_tx,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Close the listener and every open connection. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        let mut accept_task = running.accept_task;
        if time::timeout(SHUTDOWN_GRACE * 2, &mut accept_task).await.is_err() {
            tracing::warn!("accept loop did not stop in time; aborting");
            accept_task.abort();
        }
        tracing::info!(addr = %running.local_addr, "relay server stopped");
    }
}

async fn accept_loop(state: RelayState, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
    let mut conns = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let span = tracing::info_span!("conn", %peer);
                    conns.spawn(
                        serve_connection(state.clone(), stream, peer, shutdown.clone()).instrument(span),
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },

            Some(_) = conns.join_next(), if !conns.is_empty() => {}
        }
    }

    drop(listener);

    // Connections watch the same shutdown signal.
    let drain = async { while conns.join_next().await.is_some() {} };
    if time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!(remaining = conns.len(), "connections did not close in time; aborting");
        conns.abort_all();
    }
}
