//! Relay client lifecycle: connect, drain, read, retry, stop.
//!
//! One supervised task per started client owns the socket. Producers only
//! touch the outbox (`submit`) and are never blocked by the network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::Instrument;

use canrelay_core::error::{RelayError, Result};
use canrelay_core::protocol::{decode_frame, encode_frame, Envelope, LineFramer, Mapping, Message};

use crate::config::ClientConfig;
use crate::queue::Outbox;
use crate::state::ConnectionState;

/// How long `stop()` waits for the supervised task before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(2);

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// State shared between the handle and the supervised task.
struct Shared {
    outbox: Mutex<Outbox>,
    wake: Notify,
    state: watch::Sender<ConnectionState>,
    server_mapping: Mutex<Option<Mapping>>,
    connect_attempts: AtomicU64,
}

impl Shared {
    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|s| {
            if *s == next {
                return false;
            }
            *s = next;
            true
        });
        if changed {
            tracing::debug!(state = next.as_str(), "client state");
        }
    }

    fn on_connected(&self) {
        self.outbox().on_connected();
        self.set_state(ConnectionState::Connected);
    }

    fn on_disconnected(&self) {
        self.outbox().on_disconnected();
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Why a session ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    PeerClosed,
    Shutdown,
}

/// Resilient outbound connection to a relay server.
pub struct RelayClient {
    cfg: ClientConfig,
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl RelayClient {
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        cfg.validate()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            shared: Arc::new(Shared {
                outbox: Mutex::new(Outbox::new(cfg.event_queue_capacity)),
                wake: Notify::new(),
                state,
                server_mapping: Mutex::new(None),
                connect_attempts: AtomicU64::new(0),
            }),
            cfg,
            running: tokio::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    /// Spawn the connect/retry task against `host:port`.
    pub async fn start(&self, host: &str, port: u16) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(RelayError::Configuration("relay client already started".into()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = tracing::info_span!("relay_client", %host, port);
        let task = tokio::spawn(
            supervise(
                Arc::clone(&self.shared),
                self.cfg.clone(),
                host.to_string(),
                port,
                shutdown_rx,
            )
            .instrument(span),
        );

        *running = Some(Running {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Cancel any pending connect, read, write or retry delay and close the
    /// socket. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        let mut task = running.task;
        if time::timeout(STOP_GRACE, &mut task).await.is_err() {
            tracing::warn!("client task did not stop in time; aborting");
            task.abort();
        }
        self.shared.on_disconnected();
        tracing::info!("relay client stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Queue one envelope. Never blocks on the network.
    ///
    /// `metrics` is dropped unless connected; `event`/`ping` wait in the
    /// bounded ring; `mapping` is retained and re-sent after every reconnect.
    pub fn submit(&self, env: Envelope) {
        self.shared.outbox().push(env);
        self.shared.wake.notify_one();
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until `pred` holds for the connection state, or `limit` elapses.
    pub async fn wait_for_state<F>(&self, limit: Duration, pred: F) -> bool
    where
        F: Fn(ConnectionState) -> bool,
    {
        let mut rx = self.subscribe_state();
        time::timeout(limit, rx.wait_for(|s| pred(*s)))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Last mapping the server sent us, if any.
    pub fn server_mapping(&self) -> Option<Mapping> {
        self.shared
            .server_mapping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dropped_events(&self) -> u64 {
        self.shared.outbox().dropped_events()
    }

    pub fn dropped_metrics(&self) -> u64 {
        self.shared.outbox().dropped_metrics()
    }

    pub fn pending_events(&self) -> usize {
        self.shared.outbox().pending_control()
    }

    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::Relaxed)
    }
}

async fn supervise(
    shared: Arc<Shared>,
    cfg: ClientConfig,
    host: String,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.set_state(ConnectionState::Connecting);
        let attempt = shared.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let connect = time::timeout(cfg.connect_timeout(), TcpStream::connect((host.as_str(), port)));

        let connected = tokio::select! {
            _ = shutdown.changed() => break,
            res = connect => res,
        };

        match connected {
            Ok(Ok(stream)) => {
                tracing::info!(attempt, "connected to relay server");
                shared.on_connected();
                let res = run_session(&shared, &cfg, stream, &mut shutdown).await;
                shared.on_disconnected();
                match res {
                    Ok(SessionEnd::Shutdown) => break,
                    Ok(SessionEnd::PeerClosed) => tracing::warn!("relay server closed the connection"),
                    Err(e) => tracing::warn!(error = %e, "relay connection lost"),
                }
            }
            Ok(Err(e)) => {
                shared.set_state(ConnectionState::Disconnected);
                tracing::warn!(attempt, error = %e, "connect failed");
            }
            Err(_) => {
                shared.set_state(ConnectionState::Disconnected);
                tracing::warn!(attempt, "connect timed out");
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = time::sleep(cfg.retry_interval()) => {}
        }
    }

    shared.on_disconnected();
}

async fn run_session(
    shared: &Shared,
    cfg: &ClientConfig,
    stream: TcpStream,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd> {
    let _ = stream.set_nodelay(true);
    let (mut rd, mut wr) = stream.into_split();
    let mut framer = LineFramer::new(cfg.max_frame_bytes);
    let keepalive = cfg.keepalive_interval();
    let mut last_write = Instant::now();

    loop {
        // Drain everything queued before waiting again.
        loop {
            let Some(item) = shared.outbox().next() else {
                break;
            };
            let write = write_envelope(&mut wr, item.envelope(), cfg.write_timeout());
            let res = tokio::select! {
                _ = shutdown.changed() => None,
                res = write => Some(res),
            };
            match res {
                None => {
                    shared.outbox().requeue(item);
                    return Ok(SessionEnd::Shutdown);
                }
                Some(Ok(())) => last_write = Instant::now(),
                Some(Err(e @ RelayError::Transport(_))) => {
                    shared.outbox().requeue(item);
                    return Err(e);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, kind = item.envelope().kind().as_str(), "envelope not sendable; dropped");
                }
            }
        }

        let read = tokio::select! {
            _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
            _ = shared.wake.notified() => continue,
            _ = keepalive_due(keepalive.map(|k| last_write + k)) => {
                write_envelope(&mut wr, &Envelope::ping(), cfg.write_timeout()).await?;
                last_write = Instant::now();
                tracing::trace!("keepalive ping sent");
                continue;
            }
            read = rd.read_buf(framer.buffer_mut()) => read,
        };

        match read {
            Ok(0) => return Ok(SessionEnd::PeerClosed),
            Ok(_) => {
                shared.set_state(ConnectionState::Receiving);
                while let Some(line) = framer.next_frame()? {
                    on_inbound(shared, decode_frame(&line)?);
                }
            }
            Err(e) => return Err(RelayError::Transport(format!("read failed: {e}"))),
        }
    }
}

fn on_inbound(shared: &Shared, env: Envelope) {
    match env.message {
        Message::Ping => {
            if shared.outbox().resend_mapping() {
                tracing::info!("server requested mapping; re-sending");
            } else {
                tracing::debug!("server requested mapping; none retained");
            }
        }
        Message::Mapping(mapping) => {
            tracing::debug!(labels = mapping.channel_to_label.len(), "mapping received from server");
            *shared
                .server_mapping
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(mapping);
        }
        other => {
            tracing::debug!(kind = other.kind().as_str(), "ignoring server envelope");
        }
    }
}

/// Resolves once the connection has been write-idle until `deadline`.
async fn keepalive_due(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
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
