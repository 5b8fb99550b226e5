//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use logxy::http::ServerError;
use logxy::{AppState, HttpServer, ObservabilityRecord, ProxyConfig, RecordSink, Shutdown};

/// Record sink that keeps every record for inspection.
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<ObservabilityRecord>>,
}

impl CollectingSink {
    pub fn records(&self) -> Vec<ObservabilityRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Wait until at least `count` records arrived, or panic after 5 seconds.
    pub async fn wait_for(&self, count: usize) -> Vec<ObservabilityRecord> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let records = self.records();
            if records.len() >= count {
                return records;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} records, got {}",
                records.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl RecordSink for CollectingSink {
    fn emit(&self, record: ObservabilityRecord) {
        self.records.lock().unwrap().push(record);
    }
}

/// A running proxy under test.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub sink: Arc<CollectingSink>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a proxy on an ephemeral port forwarding to `target`.
pub async fn start_proxy(target: &str) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.upstream.target = target.to_string();
    config.timeouts.connect_secs = 2;
    config.timeouts.shutdown_grace_secs = 2;
    start_proxy_with(config).await
}

pub async fn start_proxy_with(config: ProxyConfig) -> TestProxy {
    let sink = Arc::new(CollectingSink::default());
    let state = AppState::new(&config, sink.clone()).unwrap();

    let listener = std::net::TcpListener::bind(&config.listener.bind_address).unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    let handle = tokio::spawn(HttpServer::new(config, state).run(listener, shutdown_rx));

    TestProxy {
        addr,
        sink,
        shutdown,
        handle,
    }
}

/// Serve `router` on an ephemeral port, standing in for the upstream.
pub async fn start_upstream(router: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Start a raw TCP backend that reads one request head and answers with
/// `response` verbatim before closing the connection.
pub async fn start_raw_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let mut head = Vec::new();
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Reserve a local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Caller that never follows redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
