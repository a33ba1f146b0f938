#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use canrelay_core::protocol::{decode_frame, encode_frame, Envelope, Mapping, Message, MetricsSnapshot};
use canrelay_server::aggregate::HealthStatus;
use canrelay_server::sink::{MemorySink, SinkRecord};
use canrelay_server::{router, RelayConfig, RelayServer};

const WAIT: Duration = Duration::from_secs(3);

async fn start_server(grace_ms: u64) -> (RelayServer, Arc<MemorySink>, SocketAddr) {
    let mut cfg = RelayConfig::default();
    cfg.server.mapping_grace_ms = grace_ms;
    let sink = Arc::new(MemorySink::new());
    let server = RelayServer::new(cfg, sink.clone()).unwrap();
    let addr = server.start(0).await.unwrap();
    (server, sink, addr)
}

struct Producer {
    rd: BufReader<OwnedReadHalf>,
    wr: OwnedWriteHalf,
}

impl Producer {
    async fn connect(addr: SocketAddr) -> Self {
        let (rd, wr) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            rd: BufReader::new(rd),
            wr,
        }
    }

    async fn send(&mut self, env: &Envelope) {
        self.wr.write_all(&encode_frame(env).unwrap()).await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.wr.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Envelope {
        let mut line = String::new();
        let n = tokio::time::timeout(WAIT, self.rd.read_line(&mut line))
            .await
            .expect("reply timed out")
            .unwrap();
        assert!(n > 0, "connection closed before reply");
        decode_frame(line.as_bytes()).unwrap()
    }

    /// True once the server has closed this connection.
    async fn closed_by_server(&mut self) -> bool {
        let mut buf = [0u8; 256];
        loop {
            match tokio::time::timeout(WAIT, self.rd.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}

fn metrics(load: f64) -> Envelope {
    Envelope::metrics(MetricsSnapshot {
        bus_load_percent: load,
        total_frames: 1000,
        ..Default::default()
    })
}

#[tokio::test]
async fn malformed_frame_closes_only_that_connection() {
    let (server, sink, addr) = start_server(0).await;

    let mut a = Producer::connect(addr).await;
    let mut b = Producer::connect(addr).await;

    a.send_raw("this is not json\n").await;
    assert!(a.closed_by_server().await);

    b.send(&metrics(85.0)).await;
    assert!(
        sink.wait_for(WAIT, |r| r.iter().any(|x| matches!(x, SinkRecord::Status { status: HealthStatus::Error, .. })))
            .await
    );
    assert_eq!(server.metrics().protocol_errors.get(&[]), 1);

    server.stop().await;
}

#[tokio::test]
async fn unknown_kind_keeps_connection_open() {
    let (server, sink, addr) = start_server(0).await;
    let mut p = Producer::connect(addr).await;

    p.send_raw("{\"kind\":\"heartbeat\",\"timestamp\":1,\"payload\":{}}\n").await;
    p.send(&metrics(25.5)).await;

    assert!(sink.wait_for(WAIT, |r| r.iter().any(|x| matches!(x, SinkRecord::Bus(_)))).await);
    assert_eq!(server.metrics().unknown_kinds.get(&[("kind", "heartbeat")]), 1);

    server.stop().await;
}

#[tokio::test]
async fn ping_is_answered_with_effective_mapping() {
    let (server, _sink, addr) = start_server(0).await;
    let mut p = Producer::connect(addr).await;

    let mut labels = BTreeMap::new();
    labels.insert(1, "shoulder_joint".to_string());
    p.send(&Envelope::mapping(Mapping {
        channel_to_numeric_id: BTreeMap::new(),
        channel_to_label: labels,
        ..Default::default()
    }))
    .await;
    p.send(&Envelope::ping()).await;

    match p.recv().await.message {
        Message::Mapping(m) => assert_eq!(m.channel_to_label[&1], "shoulder_joint"),
        other => panic!("unexpected reply {other:?}"),
    }
    assert_eq!(server.resolver().label(2), "id_2");

    server.stop().await;
}

#[tokio::test]
async fn grace_ping_requests_mapping() {
    let (server, _sink, addr) = start_server(100).await;
    let mut p = Producer::connect(addr).await;

    let env = p.recv().await;
    assert!(matches!(env.message, Message::Ping));
    assert_eq!(server.metrics().mapping_pings_sent.get(&[]), 1);

    server.stop().await;
}

#[tokio::test]
async fn oversize_frame_closes_connection() {
    let (server, _sink, addr) = start_server(0).await;
    let mut p = Producer::connect(addr).await;

    let huge = "x".repeat(server.state().cfg().server.max_frame_bytes + 16);
    p.send_raw(&huge).await;
    assert!(p.closed_by_server().await);

    server.stop().await;
}

#[tokio::test]
async fn failing_sink_keeps_serving() {
    let (server, sink, addr) = start_server(0).await;
    sink.set_failing(true);
    let mut p = Producer::connect(addr).await;

    p.send(&metrics(25.5)).await;
    p.send(&metrics(65.0)).await;
    assert!(sink.wait_for(WAIT, |r| r.iter().filter(|x| matches!(x, SinkRecord::Bus(_))).count() == 2).await);
    assert!(server.metrics().sink_errors.get(&[("call", "record_bus")]) >= 1);

    server.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_closes_connections() {
    let (server, _sink, addr) = start_server(0).await;
    let mut p = Producer::connect(addr).await;
    p.send(&metrics(25.5)).await;

    server.stop().await;
    assert!(!server.is_running().await);
    assert!(p.closed_by_server().await);
    server.stop().await;

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let (server, _sink, _addr) = start_server(0).await;
    let err = server.start(0).await.unwrap_err();
    assert_eq!(err.code().as_str(), "CONFIGURATION");
    server.stop().await;
}

#[tokio::test]
async fn restart_after_stop() {
    let (server, _sink, _addr) = start_server(0).await;
    server.stop().await;
    let addr = server.start(0).await.unwrap();
    assert_eq!(server.local_addr().await, Some(addr));
    server.stop().await;
}

#[tokio::test]
async fn ops_metrics_endpoint_renders_counters() {
    let (server, sink, addr) = start_server(0).await;
    let mut p = Producer::connect(addr).await;
    p.send(&metrics(25.5)).await;
    assert!(sink.wait_for(WAIT, |r| !r.is_empty()).await);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ops_addr = listener.local_addr().unwrap();
    let app = router::build_ops_router(server.state().clone());
    let ops = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let mut http = TcpStream::connect(ops_addr).await.unwrap();
    http.write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut body = String::new();
    tokio::time::timeout(WAIT, http.read_to_string(&mut body)).await.unwrap().unwrap();

    assert!(body.starts_with("HTTP/1.1 200"));
    assert!(body.contains("canrelay_envelopes_received_total{kind=\"metrics\"} 1"));
    assert!(body.contains("canrelay_connections_active 1"));
    assert!(body.contains("canrelay_mapping_generation 0"));

    ops.abort();
    server.stop().await;
}
