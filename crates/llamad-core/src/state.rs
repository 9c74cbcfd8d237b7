//! Canonical service state shared with the application layer.
//!
//! `ServiceState` is the single source of truth for the supervisor's view of
//! the managed llama-server instance. It is owned exclusively by the state
//! manager in the supervisor crate; everything else sees cloned snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the supervised server.
///
/// These are the only valid values; transitions between them are governed by
/// the orchestrator's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// No server has been started yet (or it was stopped cleanly).
    Initial,
    /// A start is in progress: spawning and waiting for readiness.
    Starting,
    /// The server is healthy and accepting requests.
    Ready,
    /// A fatal error occurred or retries were exhausted. Terminal until an
    /// explicit external start.
    Error,
    /// The server exited unexpectedly; recovery may be in progress.
    Crashed,
    /// An explicit stop is in progress.
    Stopping,
}

impl ServiceStatus {
    /// Whether the supervisor considers the process expected to be running.
    #[must_use]
    pub const fn expects_process(&self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

/// Load state of a model known to the running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelLoadState {
    /// Present on disk and servable.
    #[default]
    Available,
    /// Currently being loaded into memory.
    Loading,
    /// Loaded and resident.
    Loaded,
}

/// Descriptor for a model reported by the running server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Stable identifier (usually the model file name or server-assigned id).
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Size in bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Load state as last reported.
    #[serde(default)]
    pub load_state: ModelLoadState,
}

impl ModelInfo {
    /// Create a descriptor with just an id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size: None,
            load_state: ModelLoadState::default(),
        }
    }

    /// Set the size in bytes.
    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Snapshot of the supervisor's canonical state.
///
/// Invariants maintained by the state manager:
/// - `retries` is reset to 0 whenever `status` becomes [`ServiceStatus::Ready`].
/// - `last_error` is cleared whenever `status` becomes [`ServiceStatus::Ready`].
/// - `uptime` is only non-zero while `status == Ready` and `started_at` is set.
/// - `models` is empty while `status` is `Initial`, `Starting`, or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    /// Current lifecycle status.
    pub status: ServiceStatus,
    /// Models currently known to the server, in server order.
    pub models: Vec<ModelInfo>,
    /// Human-readable message for the most recent surfaced failure.
    pub last_error: Option<String>,
    /// Consecutive crash-retry attempts since the last successful start.
    pub retries: u32,
    /// Seconds since `started_at`, recomputed on a 1-second tick while ready.
    pub uptime: u64,
    /// When the server last became ready.
    pub started_at: Option<DateTime<Utc>>,
}

impl ServiceState {
    /// The state every supervisor starts in.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            status: ServiceStatus::Initial,
            models: Vec::new(),
            last_error: None,
            retries: 0,
            uptime: 0,
            started_at: None,
        }
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::initial()
    }
}
