//! Launch configuration for the supervised llama-server instance.
//!
//! The configuration is supplied by the caller (dashboard config store) and
//! is immutable for the supervisor's lifetime; the supervisor only reads it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ServiceError, ServiceResult};

/// Configuration for launching and supervising a llama-server instance.
///
/// This is an intent-based configuration: it expresses what the caller wants
/// served, not how the process is managed. Optional fields are omitted from
/// the command line when unset; `-1` sentinels on `threads` and `gpu_layers`
/// mean "let the server decide" and also omit the flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Host the server should bind to.
    pub host: String,
    /// Port the server should listen on.
    pub port: u16,
    /// Path to the llama-server binary.
    pub binary_path: PathBuf,
    /// Directory of model files, used when no single model path is given.
    pub models_dir: Option<PathBuf>,
    /// Path to a specific model file to serve.
    pub model_path: Option<PathBuf>,
    /// Context size (`-c`).
    pub ctx_size: Option<u64>,
    /// Batch size (`-b`).
    pub batch_size: Option<u64>,
    /// Thread count (`-t`); `-1` or `None` lets the server decide.
    pub threads: Option<i64>,
    /// GPU layers to offload (`-ngl`); `-1` or `None` lets the server decide.
    pub gpu_layers: Option<i64>,
    /// Flash attention toggle; `None` leaves the server default.
    pub flash_attn: Option<bool>,
    /// Sampling temperature (`--temp`).
    pub temperature: Option<f64>,
    /// Top-k sampling (`--top-k`).
    pub top_k: Option<u32>,
    /// Top-p sampling (`--top-p`).
    pub top_p: Option<f64>,
    /// Repetition penalty (`--repeat-penalty`).
    pub repeat_penalty: Option<f64>,
    /// Max tokens to predict (`--n-predict`).
    pub n_predict: Option<i64>,
    /// Additional arguments passed through verbatim.
    pub extra_args: Vec<String>,
}

impl ServiceConfig {
    /// Create a configuration with required fields only.
    pub fn new(host: impl Into<String>, port: u16, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            binary_path: binary_path.into(),
            models_dir: None,
            model_path: None,
            ctx_size: None,
            batch_size: None,
            threads: None,
            gpu_layers: None,
            flash_attn: None,
            temperature: None,
            top_k: None,
            top_p: None,
            repeat_penalty: None,
            n_predict: None,
            extra_args: Vec::new(),
        }
    }

    /// Set the models directory.
    #[must_use]
    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = Some(dir.into());
        self
    }

    /// Set a specific model file to serve.
    #[must_use]
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Set the context size.
    #[must_use]
    pub const fn with_ctx_size(mut self, size: u64) -> Self {
        self.ctx_size = Some(size);
        self
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the thread count.
    #[must_use]
    pub const fn with_threads(mut self, threads: i64) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set the number of GPU layers to offload.
    #[must_use]
    pub const fn with_gpu_layers(mut self, layers: i64) -> Self {
        self.gpu_layers = Some(layers);
        self
    }

    /// Toggle flash attention.
    #[must_use]
    pub const fn with_flash_attn(mut self, enabled: bool) -> Self {
        self.flash_attn = Some(enabled);
        self
    }

    /// Append extra arguments passed through verbatim.
    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Validate fields the supervisor depends on before any spawn attempt.
    ///
    /// Binary existence and executability are checked separately by the
    /// process manager right before spawning; this catches caller mistakes
    /// that no amount of retrying would fix.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.host.trim().is_empty() {
            return Err(ServiceError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ServiceError::Config("port must be non-zero".into()));
        }
        if self.port < 1024 {
            return Err(ServiceError::Config(format!(
                "port {} is a privileged port, use a port >= 1024",
                self.port
            )));
        }
        if self.binary_path.as_os_str().is_empty() {
            return Err(ServiceError::Config(
                "llama-server binary path is not set".into(),
            ));
        }
        Ok(())
    }

    /// Base URL of the server this configuration describes.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
