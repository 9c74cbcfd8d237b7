//! Spawning and lifecycle tracking of the llama-server child process.
//!
//! Every spawned process gets a monotonically increasing generation number
//! and a dedicated monitor task that owns the [`Child`]. The monitor reports
//! exactly one [`ProcessEvent::Exited`] per process on the supervisor's event
//! channel, whether the process died on its own or was killed on request.
//! The generation lets the supervisor discard exit events from processes it
//! has already replaced.

mod shutdown;
mod stream;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use llamad_core::{ServerLogSink, ServiceConfig, ServiceError, ServiceResult};

use crate::args::build_server_args;
use shutdown::shutdown_child;
use stream::spawn_output_reader;

/// How long a SIGTERM'd process gets before SIGKILL.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on waiting for the monitor to confirm a requested kill.
/// Covers the grace period plus SIGKILL reaping with room to spare.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(15);

/// Events emitted by process monitor tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The child exited.
    Exited {
        /// Generation of the process that exited.
        generation: u64,
        /// Exit code, `None` when the process was signalled.
        exit_code: Option<i32>,
        /// Whether the exit was requested through [`ProcessManager::kill`].
        killed: bool,
    },
}

struct SpawnedProcess {
    generation: u64,
    running: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    done_rx: oneshot::Receiver<()>,
}

/// Owner of the currently supervised llama-server process, if any.
pub struct ProcessManager {
    events: mpsc::UnboundedSender<ProcessEvent>,
    log_sink: Option<Arc<dyn ServerLogSink>>,
    generation: u64,
    current: Option<SpawnedProcess>,
}

impl ProcessManager {
    /// Create a manager that reports exits on `events`.
    pub fn new(events: mpsc::UnboundedSender<ProcessEvent>) -> Self {
        Self {
            events,
            log_sink: None,
            generation: 0,
            current: None,
        }
    }

    /// Forward captured server output to `sink` in addition to tracing.
    #[must_use]
    pub fn with_log_sink(mut self, sink: Arc<dyn ServerLogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Whether a supervised process is currently alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|p| p.running.load(Ordering::SeqCst))
    }

    /// Generation of the currently tracked process.
    #[must_use]
    pub fn current_generation(&self) -> Option<u64> {
        self.current.as_ref().map(|p| p.generation)
    }

    /// Forget the current process after its exit has been handled.
    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Launch llama-server with arguments built from `config`, returning the
    /// new process's generation number.
    ///
    /// Fails fast when a process is already tracked or the binary is missing
    /// or not executable; both are [`ServiceError::Spawn`] and never retried.
    pub fn spawn(&mut self, config: &ServiceConfig) -> ServiceResult<u64> {
        if self.is_running() {
            return Err(ServiceError::Spawn(
                "a llama-server process is already running".into(),
            ));
        }
        check_binary(&config.binary_path)?;

        let server_args = build_server_args(config);
        debug!(binary = %config.binary_path.display(), args = ?server_args, "launching llama-server");

        let mut child = Command::new(&config.binary_path)
            .args(&server_args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|err| {
                ServiceError::Spawn(format!("{}: {err}", config.binary_path.display()))
            })?;

        if let Some(stdout) = child.stdout.take() {
            spawn_output_reader(stdout, config.port, "stdout", self.log_sink.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_reader(stderr, config.port, "stderr", self.log_sink.clone());
        }

        self.generation += 1;
        let generation = self.generation;
        let running = Arc::new(AtomicBool::new(true));
        let (kill_tx, kill_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        info!(pid = ?child.id(), port = config.port, generation, "llama-server spawned");
        tokio::spawn(monitor_child(
            child,
            generation,
            Arc::clone(&running),
            kill_rx,
            done_tx,
            self.events.clone(),
        ));

        self.current = Some(SpawnedProcess {
            generation,
            running,
            kill_tx: Some(kill_tx),
            done_rx,
        });
        Ok(generation)
    }

    /// Terminate the current process, if any, and wait until the monitor has
    /// reaped it.
    ///
    /// The resulting exit event carries `killed: true` so the supervisor does
    /// not treat the stop as a crash.
    pub async fn kill(&mut self) {
        let Some(mut process) = self.current.take() else {
            return;
        };
        let generation = process.generation;
        if let Some(kill_tx) = process.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        match tokio::time::timeout(KILL_CONFIRM_TIMEOUT, process.done_rx).await {
            Ok(_) => debug!(generation, "llama-server shutdown confirmed"),
            Err(_) => warn!(generation, "timed out waiting for llama-server shutdown"),
        }
    }
}

/// Owns the child for its whole life and reports its exit exactly once.
async fn monitor_child(
    mut child: Child,
    generation: u64,
    running: Arc<AtomicBool>,
    kill_rx: oneshot::Receiver<()>,
    done_tx: oneshot::Sender<()>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    // The kill branch also resolves when the kill sender is dropped, which
    // only happens once the manager stops tracking this process; shutting
    // down then is the right cleanup either way.
    let natural_exit = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };
    let (status, killed) = match natural_exit {
        Some(status) => (status, false),
        None => (shutdown_child(child, SHUTDOWN_GRACE).await, true),
    };
    running.store(false, Ordering::SeqCst);
    let exit_code = status.ok().and_then(|s| s.code());
    debug!(generation, ?exit_code, killed, "llama-server exited");
    let _ = events.send(ProcessEvent::Exited {
        generation,
        exit_code,
        killed,
    });
    let _ = done_tx.send(());
}

/// Reject binaries that cannot possibly spawn before paying for a `spawn`
/// syscall and its error shapes.
fn check_binary(path: &Path) -> ServiceResult<()> {
    let metadata = std::fs::metadata(path).map_err(|_| {
        ServiceError::Spawn(format!("binary not found: {}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(ServiceError::Spawn(format!(
            "not a regular file: {}",
            path.display()
        )));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ServiceError::Spawn(format!(
                "binary is not executable: {}",
                path.display()
            )));
        }
    }
    Ok(())
}
