//! Canonical state ownership, transition bookkeeping, and change
//! notification.
//!
//! All mutation goes through [`StateManager`]; readers only ever see cloned
//! snapshots. Subscribers are invoked after every mutation with the fresh
//! snapshot, outside the state lock, so a callback can query the manager
//! without deadlocking.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use llamad_core::{ModelInfo, ServiceState, ServiceStatus};

/// Callback invoked with a state snapshot after each change.
pub type StateCallback = Box<dyn Fn(&ServiceState) + Send + Sync>;

/// Handle returned by [`StateManager::on_state_change`], used to remove the
/// subscription again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    callback: StateCallback,
}

struct Shared {
    state: Mutex<ServiceState>,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Snapshot the state and fan it out to every subscriber.
    ///
    /// Subscriber handles are cloned out of the lock first, so a slow or
    /// re-entrant callback never blocks registration. A panicking subscriber
    /// is logged and skipped; it must not take the others down with it.
    fn notify(&self) {
        let snapshot = lock(&self.state).clone();
        let subscribers: Vec<Arc<Subscriber>> = lock(&self.subscribers).clone();
        for subscriber in subscribers {
            let result = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(&snapshot)));
            if result.is_err() {
                warn!(id = subscriber.id, "state change subscriber panicked");
            }
        }
    }
}

/// Owner of the canonical [`ServiceState`].
///
/// Transition side effects live here so the orchestrator cannot forget them:
/// entering `ready` resets the retry counter and error message and stamps
/// `started_at`; leaving the running statuses clears the model list.
pub struct StateManager {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    uptime_task: Mutex<Option<JoinHandle<()>>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ServiceState::initial()),
                subscribers: Mutex::new(Vec::new()),
            }),
            next_id: AtomicU64::new(1),
            uptime_task: Mutex::new(None),
        }
    }

    /// Cloned snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        lock(&self.shared.state).clone()
    }

    /// Transition to `status`, applying the transition's side effects, then
    /// notify subscribers.
    ///
    /// `error` replaces `last_error` when given; entering `ready` always
    /// clears it.
    pub fn update_status(&self, status: ServiceStatus, error: Option<String>) {
        {
            let mut state = lock(&self.shared.state);
            debug!(from = ?state.status, to = ?status, "status transition");
            state.status = status;
            if let Some(message) = error {
                state.last_error = Some(message);
            }
            match status {
                ServiceStatus::Ready => {
                    state.retries = 0;
                    state.last_error = None;
                    state.started_at = Some(Utc::now());
                    state.uptime = 0;
                }
                ServiceStatus::Initial => {
                    state.models.clear();
                    state.uptime = 0;
                    state.started_at = None;
                    state.retries = 0;
                }
                ServiceStatus::Error => {
                    state.models.clear();
                    state.uptime = 0;
                    state.started_at = None;
                }
                ServiceStatus::Starting => {
                    state.models.clear();
                    state.uptime = 0;
                }
                ServiceStatus::Crashed => {
                    state.uptime = 0;
                }
                ServiceStatus::Stopping => {}
            }
        }
        self.shared.notify();
    }

    /// Replace the model list and notify subscribers.
    pub fn set_models(&self, models: Vec<ModelInfo>) {
        {
            let mut state = lock(&self.shared.state);
            state.models = models;
        }
        self.shared.notify();
    }

    /// Bump the consecutive crash-retry counter and notify subscribers.
    pub fn increment_retries(&self) {
        {
            let mut state = lock(&self.shared.state);
            state.retries += 1;
        }
        self.shared.notify();
    }

    /// Zero the retry counter without a status transition.
    ///
    /// Used when an explicit external start begins a fresh recovery cycle.
    /// Only notifies when the counter actually changed.
    pub fn reset_retries(&self) {
        let changed = {
            let mut state = lock(&self.shared.state);
            let changed = state.retries != 0;
            state.retries = 0;
            changed
        };
        if changed {
            self.shared.notify();
        }
    }

    /// Register a callback for state changes.
    pub fn on_state_change(
        &self,
        callback: impl Fn(&ServiceState) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.subscribers).push(Arc::new(Subscriber {
            id,
            callback: Box::new(callback),
        }));
        SubscriptionId(id)
    }

    /// Remove a previously registered callback. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.shared.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id.0);
        subscribers.len() != before
    }

    /// Begin the 1-second uptime tick.
    ///
    /// Stamps `started_at` if unset and recomputes `uptime` from it on every
    /// tick while the status is `ready`. Restarting replaces any previous
    /// tick task without double-counting.
    pub fn start_uptime_tracking(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.started_at.is_none() {
                state.started_at = Some(Utc::now());
            }
        }
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so the first
            // recomputation lands a full second after becoming ready.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let changed = {
                    let mut state = lock(&shared.state);
                    if state.status == ServiceStatus::Ready {
                        if let Some(started_at) = state.started_at {
                            let elapsed = Utc::now().signed_duration_since(started_at);
                            state.uptime =
                                u64::try_from(elapsed.num_seconds()).unwrap_or(0);
                            true
                        } else {
                            false
                        }
                    } else {
                        false
                    }
                };
                if changed {
                    shared.notify();
                }
            }
        });
        if let Some(previous) = lock(&self.uptime_task).replace(task) {
            previous.abort();
        }
    }

    /// Stop the uptime tick, freezing `uptime` and `started_at` at their
    /// current values.
    pub fn stop_uptime_tracking(&self) {
        if let Some(task) = lock(&self.uptime_task).take() {
            task.abort();
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StateManager {
    fn drop(&mut self) {
        self.stop_uptime_tracking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn starts_in_initial_state() {
        let manager = StateManager::new();
        assert_eq!(manager.state(), ServiceState::initial());
    }

    #[test]
    fn ready_resets_retries_and_error() {
        let manager = StateManager::new();
        manager.update_status(ServiceStatus::Crashed, Some("boom".into()));
        manager.increment_retries();
        manager.increment_retries();
        assert_eq!(manager.state().retries, 2);
        assert_eq!(manager.state().last_error.as_deref(), Some("boom"));

        manager.update_status(ServiceStatus::Ready, None);
        let state = manager.state();
        assert_eq!(state.retries, 0);
        assert_eq!(state.last_error, None);
        assert!(state.started_at.is_some());
    }

    #[test]
    fn leaving_running_statuses_clears_models() {
        let manager = StateManager::new();
        manager.update_status(ServiceStatus::Ready, None);
        manager.set_models(vec![ModelInfo::new("llama-3.gguf", "Llama 3")]);
        assert_eq!(manager.state().models.len(), 1);

        manager.update_status(ServiceStatus::Error, Some("Max retries exceeded".into()));
        assert!(manager.state().models.is_empty());
    }

    #[test]
    fn snapshots_are_independent() {
        let manager = StateManager::new();
        let snapshot = manager.state();
        manager.update_status(ServiceStatus::Starting, None);
        assert_eq!(snapshot.status, ServiceStatus::Initial);
        assert_eq!(manager.state().status, ServiceStatus::Starting);
    }

    #[test]
    fn subscribers_see_every_change() {
        let manager = StateManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.on_state_change(move |state| {
            sink.lock().unwrap().push(state.status);
        });

        manager.update_status(ServiceStatus::Starting, None);
        manager.update_status(ServiceStatus::Ready, None);
        manager.increment_retries();

        let statuses = seen.lock().unwrap().clone();
        assert_eq!(
            statuses,
            [
                ServiceStatus::Starting,
                ServiceStatus::Ready,
                ServiceStatus::Ready
            ]
        );
    }

    #[test]
    fn unsubscribed_callbacks_stop_firing() {
        let manager = StateManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = manager.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.update_status(ServiceStatus::Starting, None);
        assert!(manager.unsubscribe(id));
        assert!(!manager.unsubscribe(id));
        manager.update_status(ServiceStatus::Ready, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let manager = StateManager::new();
        manager.on_state_change(|_| panic!("bad subscriber"));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        manager.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.update_status(ServiceStatus::Starting, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn uptime_ticks_while_ready_and_freezes_on_stop() {
        let manager = StateManager::new();
        manager.update_status(ServiceStatus::Ready, None);
        manager.start_uptime_tracking();

        tokio::time::sleep(Duration::from_millis(2_300)).await;
        let running = manager.state();
        assert!(running.uptime >= 2, "uptime was {}", running.uptime);
        let started_at = running.started_at;

        manager.stop_uptime_tracking();
        let frozen = manager.state().uptime;
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(manager.state().uptime, frozen);
        assert_eq!(manager.state().started_at, started_at);
    }

    #[tokio::test]
    async fn restarting_tracking_does_not_double_count() {
        let manager = StateManager::new();
        manager.update_status(ServiceStatus::Ready, None);
        manager.start_uptime_tracking();
        manager.start_uptime_tracking();

        tokio::time::sleep(Duration::from_millis(1_300)).await;
        let uptime = manager.state().uptime;
        assert!((1..=2).contains(&uptime), "uptime was {uptime}");
        manager.stop_uptime_tracking();
    }
}
