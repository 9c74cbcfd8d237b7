//! Shared helpers for supervisor integration tests: a minimal HTTP server
//! standing in for llama-server's endpoints, plus state observation helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use llamad_supervisor::{LlamaService, ServiceStatus};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One-connection-at-a-time HTTP server answering every request on every
/// path with a canned response chosen by request number.
pub struct MockServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Answer `503` for the first `failures` requests and `200` afterwards,
    /// mimicking llama-server while a model is loading.
    pub async fn health(failures: usize) -> Self {
        Self::start(move |n| {
            if n < failures {
                (503, r#"{"error":{"message":"Loading model"}}"#.to_string())
            } else {
                (200, r#"{"status":"ok"}"#.to_string())
            }
        })
        .await
    }

    /// Answer every request with `200` and `body`.
    pub async fn json(body: &str) -> Self {
        let body = body.to_string();
        Self::start(move |_| (200, body.clone())).await
    }

    async fn start(responder: impl Fn(usize) -> (u16, String) + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let responder = Arc::new(responder);
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let responder = Arc::clone(&responder);
                tokio::spawn(async move {
                    let mut request = [0_u8; 2048];
                    let _ = socket.read(&mut request).await;
                    let (status, body) = responder(n);
                    let reason = match status {
                        200 => "OK",
                        503 => "Service Unavailable",
                        _ => "Unknown",
                    };
                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Self { addr, hits, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Record every status the service publishes, in order.
pub fn record_statuses(service: &LlamaService) -> Arc<Mutex<Vec<ServiceStatus>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    service.on_state_change(move |state| {
        sink.lock().unwrap().push(state.status);
    });
    log
}

/// Collapse consecutive duplicates so the log reads as transitions.
pub fn transitions(log: &Mutex<Vec<ServiceStatus>>) -> Vec<ServiceStatus> {
    let mut result: Vec<ServiceStatus> = Vec::new();
    for status in log.lock().unwrap().iter() {
        if result.last() != Some(status) {
            result.push(*status);
        }
    }
    result
}

/// Poll until the service reaches `want`, panicking after `timeout`.
pub async fn wait_for_status(service: &LlamaService, want: ServiceStatus, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = service.state().status;
        if status == want {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {want:?}, still {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Write an executable stand-in for the llama-server binary.
#[cfg(unix)]
pub fn fake_server(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join("llama-server");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
