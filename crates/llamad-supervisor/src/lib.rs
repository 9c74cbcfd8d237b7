//! Process supervision for llama-server.
//!
//! This crate owns the llama-server lifecycle on behalf of the host
//! application: spawning with arguments derived from a [`ServiceConfig`],
//! polling `/health` until the model is loaded, restarting crashed servers
//! with exponential backoff, and publishing every state change through
//! [`LlamaService::on_state_change`].
//!
//! ```no_run
//! use llamad_core::ServiceConfig;
//! use llamad_supervisor::LlamaService;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::new("127.0.0.1", 8134, "/opt/llama/llama-server")
//!     .with_models_dir("/var/lib/llamad/models");
//! let service = LlamaService::new(config);
//! service.start().await?;
//! println!("status: {:?}", service.state().status);
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod catalog;
pub mod health;
pub mod process;
pub mod retry;
pub mod service;
pub mod state_manager;

pub use catalog::HttpModelCatalog;
pub use health::HealthChecker;
pub use process::{ProcessEvent, ProcessManager};
pub use retry::RetryPolicy;
pub use service::{LlamaService, LlamaServiceBuilder};
pub use state_manager::{StateCallback, StateManager, SubscriptionId};

// Re-export the core types callers need to drive the service.
pub use llamad_core::{
    CatalogError, ModelCatalog, ModelInfo, ModelLoadState, NoopLogSink, ServerLogSink,
    ServiceConfig, ServiceError, ServiceResult, ServiceState, ServiceStatus,
};
