//! Retry with capped exponential backoff for transient failures

use std::time::Duration;

use crate::error::FetchError;
use crate::stop::StopSignal;

/// Bounded retry policy for a single external call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(64),
        }
    }
}

impl RetryPolicy {
    /// Retry policy that never sleeps. For tests and pass-through fetchers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base · 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `attempt_fn` until it succeeds, fails non-transiently, or the policy
/// runs out of attempts.
///
/// Returns the final result together with the number of attempts made.
/// A stop request during a backoff wait ends the loop early with the last
/// transient error.
pub fn retry_with_backoff<T>(
    label: &str,
    policy: &RetryPolicy,
    stop: &StopSignal,
    mut attempt_fn: impl FnMut() -> Result<T, FetchError>,
) -> (Result<T, FetchError>, u32) {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match attempt_fn() {
            Ok(v) => return (Ok(v), attempt),
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let delay = policy.backoff(attempt);
                log::debug!(
                    "{label}: attempt {attempt}/{max_attempts} failed: {e}, retrying in {delay:?}"
                );
                if stop.sleep(delay) {
                    log::debug!("{label}: stop requested during backoff");
                    return (Err(e), attempt);
                }
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}
