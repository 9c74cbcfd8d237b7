//! The supervisor orchestrator and its public handle.
//!
//! [`LlamaService`] is a cheap handle; the actual work happens in a single
//! background task that owns the process manager and serializes every
//! lifecycle decision. Commands from the handle and exit events from process
//! monitors arrive on channels and are handled one at a time, so there is no
//! state the task can race itself on. The one thing that crosses that
//! boundary out-of-band is the cancellation token: [`LlamaService::stop`]
//! cancels it before queueing the stop command, which yanks the task out of
//! readiness polls and backoff sleeps immediately.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use llamad_core::{
    ModelCatalog, ServerLogSink, ServiceConfig, ServiceError, ServiceResult, ServiceState,
    ServiceStatus,
};

use crate::catalog::HttpModelCatalog;
use crate::health::HealthChecker;
use crate::process::{ProcessEvent, ProcessManager};
use crate::retry::RetryPolicy;
use crate::state_manager::{StateManager, SubscriptionId};

const DEFAULT_READY_ATTEMPTS: u32 = 30;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

enum Command {
    Start {
        ack: oneshot::Sender<ServiceResult<()>>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a supervised llama-server instance.
///
/// Cloning is not needed: the handle is `Send + Sync` and all methods take
/// `&self`. Dropping the last handle closes the command channel, which makes
/// the background task stop the server and exit.
pub struct LlamaService {
    state: Arc<StateManager>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl LlamaService {
    /// Supervise a server with default policies.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building a supervisor with custom policies.
    #[must_use]
    pub fn builder(config: ServiceConfig) -> LlamaServiceBuilder {
        LlamaServiceBuilder {
            config,
            log_sink: None,
            catalog: None,
            retry_policy: RetryPolicy::default(),
            ready_attempts: DEFAULT_READY_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Start the server and wait until it is ready (or the attempt failed).
    ///
    /// A no-op returning `Ok` when the server is already starting or ready.
    /// On a retryable failure this returns the error once the first attempt
    /// is spent; recovery then continues in the background.
    pub async fn start(&self) -> ServiceResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start { ack: ack_tx })
            .map_err(|_| ServiceError::Internal("supervisor task terminated".into()))?;
        ack_rx
            .await
            .map_err(|_| ServiceError::Internal("supervisor task terminated".into()))?
    }

    /// Stop the server and wait for the process to be gone.
    ///
    /// Cancels any in-flight start or pending crash-retry wait first, so a
    /// stop always wins over recovery.
    pub async fn stop(&self) -> ServiceResult<()> {
        lock_token(&self.cancel).cancel();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop { ack: ack_tx })
            .map_err(|_| ServiceError::Internal("supervisor task terminated".into()))?;
        ack_rx
            .await
            .map_err(|_| ServiceError::Internal("supervisor task terminated".into()))
    }

    /// Snapshot of the current service state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.state.state()
    }

    /// Register a callback invoked with a snapshot after every state change.
    pub fn on_state_change(
        &self,
        callback: impl Fn(&ServiceState) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.state.on_state_change(callback)
    }

    /// Remove a state change callback. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.unsubscribe(id)
    }
}

/// Builder for [`LlamaService`] with injectable policies, mostly useful for
/// callers that need faster schedules than the production defaults.
pub struct LlamaServiceBuilder {
    config: ServiceConfig,
    log_sink: Option<Arc<dyn ServerLogSink>>,
    catalog: Option<Arc<dyn ModelCatalog>>,
    retry_policy: RetryPolicy,
    ready_attempts: u32,
    poll_interval: Duration,
}

impl LlamaServiceBuilder {
    /// Forward captured server output to `sink`.
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn ServerLogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Replace the default HTTP model catalog.
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replace the default crash-retry policy.
    #[must_use]
    pub const fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Cap on health probes per start attempt.
    #[must_use]
    pub const fn ready_attempts(mut self, attempts: u32) -> Self {
        self.ready_attempts = attempts;
        self
    }

    /// Delay between health probes while waiting for readiness.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Spawn the supervisor task and return its handle.
    #[must_use]
    pub fn build(self) -> LlamaService {
        let state = Arc::new(StateManager::new());
        let cancel = Arc::new(Mutex::new(CancellationToken::new()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (proc_tx, proc_rx) = mpsc::unbounded_channel();

        let mut process = ProcessManager::new(proc_tx);
        if let Some(sink) = self.log_sink {
            process = process.with_log_sink(sink);
        }
        let health = HealthChecker::new(&self.config.host, self.config.port)
            .with_poll_interval(self.poll_interval);
        let catalog = self.catalog.unwrap_or_else(|| {
            Arc::new(HttpModelCatalog::new(&self.config.host, self.config.port))
        });

        let supervisor = Supervisor {
            config: self.config,
            state: Arc::clone(&state),
            process,
            health,
            catalog,
            retry: self.retry_policy,
            ready_attempts: self.ready_attempts,
            cancel: Arc::clone(&cancel),
            cmd_rx,
            proc_rx,
            stopping: false,
        };
        tokio::spawn(supervisor.run());

        LlamaService {
            state,
            cmd_tx,
            cancel,
        }
    }
}

fn lock_token(slot: &Mutex<CancellationToken>) -> std::sync::MutexGuard<'_, CancellationToken> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a start attempt that did not fail outright ended.
enum StartOutcome {
    Ready,
    Cancelled,
}

/// What the command loop should do after a start command.
enum StartDisposition {
    Done(ServiceResult<()>),
    NeedsRetry(ServiceError),
}

struct Supervisor {
    config: ServiceConfig,
    state: Arc<StateManager>,
    process: ProcessManager,
    health: HealthChecker,
    catalog: Arc<dyn ModelCatalog>,
    retry: RetryPolicy,
    ready_attempts: u32,
    cancel: Arc<Mutex<CancellationToken>>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    proc_rx: mpsc::UnboundedReceiver<ProcessEvent>,
    /// Set while an explicit stop is in progress so exit events from the
    /// stopping process are not mistaken for crashes.
    stopping: bool,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Start { ack }) => match self.handle_start().await {
                        StartDisposition::Done(result) => {
                            let _ = ack.send(result);
                        }
                        StartDisposition::NeedsRetry(err) => {
                            // The caller learns about the failed attempt now;
                            // recovery keeps going behind their back.
                            let _ = ack.send(Err(err));
                            self.recover_from_crash().await;
                        }
                    },
                    Some(Command::Stop { ack }) => {
                        self.handle_stop().await;
                        let _ = ack.send(());
                    }
                    None => {
                        // Last handle dropped: shut the server down and exit.
                        self.handle_stop().await;
                        break;
                    }
                },
                Some(event) = self.proc_rx.recv() => {
                    self.handle_process_event(event).await;
                }
            }
        }
        debug!("supervisor task exiting");
    }

    async fn handle_start(&mut self) -> StartDisposition {
        let status = self.state.state().status;
        if status.expects_process() {
            debug!(?status, "start requested while already starting or ready");
            return StartDisposition::Done(Ok(()));
        }

        self.stopping = false;
        // An explicit start begins a fresh recovery cycle, even from the
        // exhausted error state.
        self.state.reset_retries();
        self.refresh_cancel();

        match self.run_start_cycle().await {
            Ok(_) => StartDisposition::Done(Ok(())),
            Err(err) if err.is_retryable() => {
                self.state.update_status(ServiceStatus::Crashed, None);
                self.state.increment_retries();
                StartDisposition::NeedsRetry(err)
            }
            Err(err) => {
                warn!(error = %err, "llama-server start failed");
                self.state
                    .update_status(ServiceStatus::Error, Some(err.to_string()));
                StartDisposition::Done(Err(err))
            }
        }
    }

    /// One spawn-and-wait-for-ready attempt.
    ///
    /// Used for both explicit starts and crash recovery; the caller decides
    /// what a failure means.
    async fn run_start_cycle(&mut self) -> ServiceResult<StartOutcome> {
        let cancel = self.current_cancel();
        self.state.update_status(ServiceStatus::Starting, None);
        self.config.validate()?;

        // A server may already be listening on our port, e.g. when the host
        // application restarted while llama-server survived. Adopt it rather
        // than spawning a second instance that would fail to bind.
        let already_healthy = tokio::select! {
            healthy = self.health.check() => healthy,
            () = cancel.cancelled() => return Ok(StartOutcome::Cancelled),
        };
        if already_healthy {
            info!(url = %self.health.health_url(), "adopting already-running llama-server");
            self.enter_ready().await;
            return Ok(StartOutcome::Ready);
        }

        let generation = self.process.spawn(&self.config)?;

        // Watch the exit channel alongside the readiness poll: a binary that
        // dies right after spawn must enter the crash path immediately, not
        // after the whole readiness budget is spent polling a dead server.
        let health = &self.health;
        let proc_rx = &mut self.proc_rx;
        let readiness = tokio::select! {
            result = health.wait_for_ready(self.ready_attempts) => result,
            exit_code = next_crash(proc_rx, generation) => {
                debug!(?exit_code, "llama-server exited before becoming ready");
                Err(ServiceError::Crash { exit_code })
            }
            () = cancel.cancelled() => {
                debug!("start cancelled while waiting for readiness");
                return Ok(StartOutcome::Cancelled);
            }
        };
        match readiness {
            Ok(()) => {
                self.enter_ready().await;
                Ok(StartOutcome::Ready)
            }
            Err(err @ ServiceError::Crash { .. }) => {
                // Already dead and reaped; just stop tracking it.
                self.process.clear_current();
                Err(err)
            }
            Err(err) => {
                // Never became healthy: reap the half-started process before
                // the retry path decides what happens next.
                self.process.kill().await;
                Err(err)
            }
        }
    }

    async fn enter_ready(&mut self) {
        self.state.update_status(ServiceStatus::Ready, None);
        self.state.start_uptime_tracking();
        info!("llama-server is ready");

        // Best effort; a server without a usable model list is still a
        // running server.
        match self.catalog.list_models().await {
            Ok(models) => {
                debug!(count = models.len(), "model list loaded");
                self.state.set_models(models);
            }
            Err(err) => {
                warn!(error = %err, "could not load model list, continuing without it");
            }
        }
    }

    /// Crash-retry loop: back off, attempt a restart, repeat until ready,
    /// cancelled, exhausted, or failed fatally.
    async fn recover_from_crash(&mut self) {
        loop {
            if self.stopping {
                return;
            }
            let cancel = self.current_cancel();
            if cancel.is_cancelled() {
                return;
            }

            let retries = self.state.state().retries;
            if !self.retry.can_retry(retries) {
                warn!(retries, "giving up on llama-server recovery");
                self.state.update_status(
                    ServiceStatus::Error,
                    Some(ServiceError::RetriesExhausted.to_string()),
                );
                return;
            }

            info!(retries, delay = ?self.retry.delay_for(retries), "scheduling llama-server restart");
            tokio::select! {
                () = self.retry.wait_for_retry(retries) => {}
                () = cancel.cancelled() => {
                    debug!("retry wait cancelled by stop");
                    return;
                }
            }

            match self.run_start_cycle().await {
                Ok(StartOutcome::Ready | StartOutcome::Cancelled) => return,
                Err(err) if err.is_retryable() => {
                    debug!(error = %err, "restart attempt failed");
                    self.state.update_status(ServiceStatus::Crashed, None);
                    self.state.increment_retries();
                }
                Err(err) => {
                    warn!(error = %err, "restart failed fatally");
                    self.state
                        .update_status(ServiceStatus::Error, Some(err.to_string()));
                    return;
                }
            }
        }
    }

    async fn handle_process_event(&mut self, event: ProcessEvent) {
        let ProcessEvent::Exited {
            generation,
            exit_code,
            killed,
        } = event;

        if killed || self.stopping {
            debug!(generation, "ignoring exit of an intentionally stopped process");
            return;
        }
        if self.process.current_generation() != Some(generation) {
            debug!(generation, "ignoring exit of a superseded process");
            return;
        }
        let status = self.state.state().status;
        if !status.expects_process() {
            debug!(generation, ?status, "ignoring exit, no process was expected");
            return;
        }

        warn!(?exit_code, "{}", ServiceError::Crash { exit_code });
        self.process.clear_current();
        self.state.stop_uptime_tracking();
        self.state.update_status(ServiceStatus::Crashed, None);
        self.state.increment_retries();
        self.recover_from_crash().await;
    }

    async fn handle_stop(&mut self) {
        self.stopping = true;
        self.state.update_status(ServiceStatus::Stopping, None);
        self.process.kill().await;
        self.state.stop_uptime_tracking();
        self.state.update_status(ServiceStatus::Initial, None);
        info!("llama-server stopped");
    }

    /// Install a fresh cancellation token for a new start cycle. Only an
    /// explicit start refreshes the token; stop cancels the current one.
    fn refresh_cancel(&self) {
        *lock_token(&self.cancel) = CancellationToken::new();
    }

    fn current_cancel(&self) -> CancellationToken {
        lock_token(&self.cancel).clone()
    }
}

/// Resolve with the exit code once the process with `generation` dies
/// unexpectedly. Events from killed or superseded processes are drained and
/// ignored; the future never resolves for them.
async fn next_crash(
    proc_rx: &mut mpsc::UnboundedReceiver<ProcessEvent>,
    generation: u64,
) -> Option<i32> {
    loop {
        match proc_rx.recv().await {
            Some(ProcessEvent::Exited {
                generation: event_generation,
                exit_code,
                killed,
            }) if event_generation == generation && !killed => return exit_code,
            Some(event) => debug!(?event, "ignoring stale process event during startup"),
            // The sender lives in the process manager, so the channel only
            // closes when the supervisor itself is being torn down.
            None => return std::future::pending().await,
        }
    }
}
