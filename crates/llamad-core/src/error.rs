//! Error taxonomy for supervisor operations.
//!
//! The taxonomy maps directly onto the recovery policy: configuration and
//! spawn failures are fatal (no retry), readiness timeouts and crashes are
//! retried up to the cap, and exhaustion is terminal until an external start.

use thiserror::Error;

/// Errors that can occur while supervising a llama-server instance.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The supplied configuration is invalid (bad host/port, missing binary
    /// path). Fatal: surfaced immediately, never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The OS failed to launch the server binary, or the binary does not
    /// exist / is not executable. Fatal: a missing binary will not appear
    /// after waiting.
    #[error("failed to spawn llama-server: {0}")]
    Spawn(String),

    /// The server never answered the health endpoint within the attempt
    /// budget. Treated like a crash and retried.
    #[error("server did not become healthy after {attempts} health check attempts")]
    ReadinessTimeout {
        /// Number of health check attempts made before giving up.
        attempts: u32,
    },

    /// The server process exited while it was expected to be running.
    /// Retried up to the cap.
    #[error("llama-server exited unexpectedly{}", .exit_code.map_or_else(String::new, |c| format!(" with code {c}")))]
    Crash {
        /// Exit code, when the process exited rather than being signalled.
        exit_code: Option<i32>,
    },

    /// The consecutive crash-retry budget is spent. Terminal until an
    /// explicit external start resets the cycle.
    ///
    /// The display string is part of the state contract: the UI matches on
    /// `last_error == "Max retries exceeded"`.
    #[error("Max retries exceeded")]
    RetriesExhausted,

    /// The supervisor task is gone (channel closed). Only reachable if the
    /// service handle outlives its background task.
    #[error("supervisor unavailable: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Fatal errors go straight to the `error` status and are never retried.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Spawn(_))
    }

    /// Recoverable errors are retried silently up to the retry cap.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ReadinessTimeout { .. } | Self::Crash { .. })
    }
}

/// Result type alias for supervisor operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
