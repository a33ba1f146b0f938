//! Per-connection receive loop.
//!
//! Responsibilities:
//! - Split incoming bytes into frames (`LineFramer`) and decode each once
//! - Dispatch; write any reply back on the same socket
//! - Lifecycle: idle timeout, shutdown signal, one-shot mapping grace ping
//!
//! A protocol error ends this connection only; the caller logs it.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};

use canrelay_core::error::{ErrorCode, RelayError, Result};
use canrelay_core::protocol::{decode_frame, encode_frame, Envelope, LineFramer};

use crate::app_state::RelayState;
use crate::dispatch::ConnectionCtx;

/// Why a connection ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    IdleTimeout,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

pub(crate) async fn run_connection(
    state: RelayState,
    stream: TcpStream,
    ctx: &mut ConnectionCtx,
    mut shutdown: watch::Receiver<bool>,
) -> Result<CloseReason> {
    let cfg = &state.cfg().server;
    let idle_timeout = Duration::from_millis(cfg.idle_timeout_ms);
    let write_timeout = Duration::from_millis(cfg.write_timeout_ms);
    let dispatcher = state.dispatcher();
    let resolver = state.resolver();

    let _ = stream.set_nodelay(true);
    let (mut rd, mut wr) = stream.into_split();
    let mut framer = LineFramer::new(cfg.max_frame_bytes);

    let grace = time::sleep(Duration::from_millis(cfg.mapping_grace_ms));
    tokio::pin!(grace);
    let mut grace_armed = cfg.mapping_grace_ms > 0;

    let mut last_activity = Instant::now();

    loop {
        if *shutdown.borrow() {
            return Ok(CloseReason::Shutdown);
        }

        // Drain every complete frame before reading more.
        while let Some(line) = framer.next_frame()? {
            let env = decode_frame(&line)?;
            tracing::debug!(conn_id = ctx.conn_id, kind = env.kind().as_str(), "envelope");

            match dispatcher.dispatch(ctx, env).await {
                Ok(Some(reply)) => write_envelope(&mut wr, &reply, write_timeout).await?,
                Ok(None) => {}
                Err(e) if e.code() == ErrorCode::Validation => {
                    tracing::warn!(conn_id = ctx.conn_id, error = %e, "envelope ignored");
                }
                Err(e) => return Err(e),
            }
        }

        tokio::select! {
            _ = shutdown.changed() => return Ok(CloseReason::Shutdown),

            read = time::timeout_at(last_activity + idle_timeout, rd.read_buf(framer.buffer_mut())) => {
                match read {
                    Err(_) => return Ok(CloseReason::IdleTimeout),
                    Ok(Ok(0)) => return Ok(CloseReason::PeerClosed),
                    Ok(Ok(_)) => last_activity = Instant::now(),
                    Ok(Err(e)) => return Err(RelayError::Transport(format!("read failed: {e}"))),
                }
            }

            _ = &mut grace, if grace_armed => {
                grace_armed = false;
                if !ctx.mapping_received() && !resolver.has_learned() {
                    tracing::info!(conn_id = ctx.conn_id, "no mapping learned within grace period; requesting one");
                    write_envelope(&mut wr, &Envelope::ping(), write_timeout).await?;
                    state.metrics().mapping_pings_sent.inc(&[]);
                }
            }
        }
    }
}

async fn write_envelope(wr: &mut OwnedWriteHalf, env: &Envelope, limit: Duration) -> Result<()> {
    let frame = encode_frame(env)?;
    match time::timeout(limit, wr.write_all(&frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RelayError::Transport(format!("write failed: {e}"))),
        Err(_) => Err(RelayError::Transport("write timed out".into())),
    }
}

/// Keeps a connection in the registry until dropped, including when the
/// owning task is aborted.
struct Registration {
    state: RelayState,
    conn_id: u64,
}

impl Registration {
    fn new(state: &RelayState, peer: SocketAddr) -> Self {
        Self {
            state: state.clone(),
            conn_id: state.register_connection(peer),
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state.unregister_connection(self.conn_id);
    }
}

/// Run one accepted connection to completion, with logging and bookkeeping.
pub(crate) async fn serve_connection(
    state: RelayState,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    let registration = Registration::new(&state, peer);
    let conn_id = registration.conn_id;
    tracing::info!(conn_id, %peer, "producer connected");
    let mut ctx = ConnectionCtx::new(conn_id, peer);
    let res = run_connection(state.clone(), stream, &mut ctx, shutdown).await;

    let metrics = state.metrics();
    match res {
        Ok(reason) => {
            metrics.connections_closed.inc(&[("reason", reason.as_str())]);
            tracing::info!(conn_id, %peer, reason = reason.as_str(), "connection closed");
        }
        Err(e) if e.code() == ErrorCode::Protocol => {
            metrics.protocol_errors.inc(&[]);
            metrics.connections_closed.inc(&[("reason", "protocol_error")]);
            tracing::warn!(conn_id, %peer, error = %e, "closing connection on protocol error");
        }
        Err(e) => {
            metrics.connections_closed.inc(&[("reason", e.code().as_str())]);
            tracing::warn!(conn_id, %peer, error = %e, "connection failed");
        }
    }
    drop(registration);
}
