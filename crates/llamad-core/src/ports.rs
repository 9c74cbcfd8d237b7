//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define what the supervisor expects from infrastructure without
//! pinning an implementation: a sink for captured server output and a
//! catalog for the model list. No HTTP or process types appear in any
//! signature.

use async_trait::async_trait;
use thiserror::Error;

use crate::state::ModelInfo;

/// Port for appending captured server log lines to a sink.
///
/// Implementations should be thread-safe and non-blocking where possible;
/// the supervisor calls this from its stream reader tasks.
pub trait ServerLogSink: Send + Sync {
    /// Append a log line from the server process.
    ///
    /// `stream_type` is either `"stdout"` or `"stderr"`; `line` has no
    /// trailing newline.
    fn append(&self, port: u16, stream_type: &str, line: String);
}

/// A no-op log sink that discards all log lines.
///
/// Useful where structured log capture is not needed; lines still reach
/// tracing in the supervisor regardless of the sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogSink;

impl ServerLogSink for NoopLogSink {
    fn append(&self, _port: u16, _stream_type: &str, _line: String) {}
}

/// Errors from the model catalog port.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The model list request could not be completed.
    #[error("model list request failed: {0}")]
    RequestFailed(String),

    /// The server answered with something that is not a model list.
    #[error("invalid model list response: {0}")]
    InvalidResponse(String),
}

/// Port for fetching the list of models the running server knows about.
///
/// The supervisor treats the catalog as best-effort: a failing catalog never
/// takes a ready server down, it only leaves the model list empty.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Fetch the current model list in server order.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, CatalogError>;
}
