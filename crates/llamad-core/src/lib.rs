//! Core domain types and port definitions for the llamad supervisor.
//!
//! This crate holds the vocabulary shared between the supervisor runtime and
//! its callers: the launch configuration, the canonical service state, the
//! error taxonomy, and the port traits the runtime depends on. It contains no
//! process or HTTP implementation details.

pub mod config;
pub mod error;
pub mod ports;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use ports::{CatalogError, ModelCatalog, NoopLogSink, ServerLogSink};
pub use state::{ModelInfo, ModelLoadState, ServiceState, ServiceStatus};
