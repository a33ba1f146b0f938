//! Shared application state for the relay server.
//!
//! One `RelayState` is built at startup and cloned into every connection
//! task. The mapping resolver inside it is the only mutable domain state
//! shared between connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use canrelay_core::error::Result;

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::mapping::MappingResolver;
use crate::obs::RelayMetrics;
use crate::sink::TelemetrySink;

#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
    resolver: Arc<MappingResolver>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<RelayMetrics>,
}

struct RelayStateInner {
    cfg: RelayConfig,
    connections: DashMap<u64, SocketAddr>,
    next_conn_id: AtomicU64,
}

impl RelayState {
    /// Build application state.
    /// Fails only on configuration problems (e.g. unreadable static mapping).
    pub fn new(cfg: RelayConfig, sink: Arc<dyn TelemetrySink>) -> Result<Self> {
        let resolver = Arc::new(MappingResolver::from_config(&cfg.mapping)?);
        Ok(Self::with_resolver(cfg, sink, resolver))
    }

    /// Build state around an already-constructed resolver.
    pub fn with_resolver(
        cfg: RelayConfig,
        sink: Arc<dyn TelemetrySink>,
        resolver: Arc<MappingResolver>,
    ) -> Self {
        let metrics = Arc::new(RelayMetrics::default());
        let dispatcher = Dispatcher::new(
            Arc::clone(&resolver),
            sink,
            cfg.classifier.clone(),
            Arc::clone(&metrics),
        );

        Self {
            inner: Arc::new(RelayStateInner {
                cfg,
                connections: DashMap::new(),
                next_conn_id: AtomicU64::new(1),
            }),
            resolver,
            dispatcher: Arc::new(dispatcher),
            metrics,
        }
    }

    pub fn cfg(&self) -> &RelayConfig {
        &self.inner.cfg
    }

    pub fn resolver(&self) -> Arc<MappingResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Register a freshly accepted connection; returns its id.
    pub(crate) fn register_connection(&self, peer: SocketAddr) -> u64 {
        let id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.inner.connections.insert(id, peer);
        self.metrics.connections_accepted.inc(&[]);
        self.metrics.connections_active.inc(&[]);
        id
    }

    pub(crate) fn unregister_connection(&self, id: u64) {
        if self.inner.connections.remove(&id).is_some() {
            self.metrics.connections_active.dec(&[]);
        }
    }

    /// Peers of currently open connections, ordered by connection id.
    pub fn active_connections(&self) -> Vec<(u64, SocketAddr)> {
        let mut conns: Vec<(u64, SocketAddr)> = self
            .inner
            .connections
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        conns.sort_by_key(|(id, _)| *id);
        conns
    }

    /// Extra gauge lines for the `/metrics` endpoint.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("canrelay_mapping_generation", self.resolver.generation()),
            ("canrelay_static_labels", self.resolver.static_labels().len() as u64),
        ]
    }
}
