//! Health checking against llama-server's `/health` endpoint.
//!
//! llama-server answers `200 OK` once the model is loaded and `503` while it
//! is still loading, so only a `200` counts as healthy; any other status or a
//! transport error is "not ready yet".

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info};

use llamad_core::{ServiceError, ServiceResult};

/// Per-request timeout; a server that takes longer than this to answer its
/// health endpoint is not usable anyway.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Probes the server's health endpoint and remembers the last result.
pub struct HealthChecker {
    client: reqwest::Client,
    url: String,
    poll_interval: Duration,
    healthy: AtomicBool,
}

impl HealthChecker {
    /// Create a checker for the server at `host:port`.
    pub fn new(host: &str, port: u16) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("http://{host}:{port}/health"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            healthy: AtomicBool::new(false),
        }
    }

    /// Override the delay between readiness poll attempts.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The URL this checker probes.
    #[must_use]
    pub fn health_url(&self) -> &str {
        &self.url
    }

    /// Result of the most recent [`check`](Self::check); `false` before the
    /// first probe.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Probe the health endpoint once.
    pub async fn check(&self) -> bool {
        let healthy = match self.client.get(&self.url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(err) => {
                debug!(url = %self.url, error = %err, "health probe failed");
                false
            }
        };
        self.healthy.store(healthy, Ordering::SeqCst);
        healthy
    }

    /// Poll the health endpoint until it answers `200 OK`, making at most
    /// `max_attempts` probes with the poll interval between them.
    pub async fn wait_for_ready(&self, max_attempts: u32) -> ServiceResult<()> {
        for attempt in 1..=max_attempts {
            if self.check().await {
                info!(url = %self.url, attempt, "server is healthy");
                return Ok(());
            }
            debug!(attempt, max_attempts, "server not ready yet");
            if attempt < max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(ServiceError::ReadinessTimeout {
            attempts: max_attempts,
        })
    }
}
