//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use gateway_pipeline::amqp::InMemoryBroker;
use gateway_pipeline::config::loader::parse_config;
use gateway_pipeline::observability::MetricsCollector;
use gateway_pipeline::proxy::Context;
use gateway_pipeline::{GatewayConfig, GatewayServer, PipelineComposer};

/// Canned answer of a mock backend.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".into(), "application/json".into())],
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Request head received by a mock backend.
pub type Received = Arc<Mutex<Vec<String>>>;

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` gets the raw request head and picks the answer. Every head is kept
/// in the returned log.
pub async fn start_mock_backend<F>(f: F) -> (SocketAddr, Received)
where
    F: Fn(&str) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Received = Arc::default();
    let log = received.clone();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = f.clone();
            let log = log.clone();
            tokio::spawn(async move {
                serve_one(socket, f.as_ref(), &log).await;
            });
        }
    });

    (addr, received)
}

/// Mock backend with a fixed answer.
pub async fn start_fixed_backend(response: MockResponse) -> (SocketAddr, Received) {
    start_mock_backend(move |_| response.clone()).await
}

async fn serve_one<F>(mut socket: TcpStream, f: &F, log: &Received)
where
    F: Fn(&str) -> MockResponse,
{
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }

    let head = String::from_utf8_lossy(&head).into_owned();
    let response = f(&head);
    log.lock().unwrap().push(head);

    let reason = StatusCode::from_u16(response.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, reason);
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.body.len(),
        response.body
    ));

    let _ = socket.write_all(out.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub root: Context,
    pub updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Parse a TOML configuration the way the binary does.
pub fn config(toml: &str) -> GatewayConfig {
    parse_config(toml).unwrap()
}

/// Start a gateway serving `config`, with hot reload through `updates`.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let root = Context::new();
    let metrics = MetricsCollector::disabled();
    let factory =
        PipelineComposer::new(root.clone(), metrics, Arc::new(InMemoryBroker::new())).build();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = GatewayServer::new(config, factory, root.clone(), metrics);
    let (updates, rx) = mpsc::unbounded_channel();
    server.spawn_reloader(rx);
    tokio::spawn(server.run(listener));

    TestGateway { addr, root, updates }
}
