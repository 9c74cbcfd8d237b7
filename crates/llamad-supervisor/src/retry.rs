//! Crash-retry policy: exponential backoff with a hard attempt cap.
//!
//! The policy is stateless. The retry counter lives in the canonical service
//! state; callers pass it in and the policy answers "may I retry?" and "how
//! long do I wait?". That keeps a single source of truth for the counter and
//! makes the schedule trivially testable.

use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Backoff schedule for restarting a crashed server.
///
/// The delay before retry attempt `n` (1-based) is `base * 2^(n-1)`, capped
/// at `max_delay`. Attempt 0 is the initial start and carries no delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl RetryPolicy {
    /// Build a policy with an explicit cap and delay bounds.
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Whether another restart is allowed after `retries` consecutive
    /// failures.
    #[must_use]
    pub const fn can_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Delay to sleep before retry attempt `attempt` (1-based).
    ///
    /// Attempt 0 is the initial start and gets no delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let exponent = attempt - 1;
        let delay_ms = if exponent >= 63 {
            u64::MAX
        } else {
            base_ms.saturating_mul(1_u64 << exponent)
        };
        Duration::from_millis(delay_ms.min(max_ms))
    }

    /// Sleep for the backoff delay of retry attempt `attempt`.
    pub async fn wait_for_retry(&self, attempt: u32) {
        let delay = self.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
