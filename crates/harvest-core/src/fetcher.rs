//! Fetch capability and the retry/cooldown wrapper around it

use std::time::{Duration, Instant};

use crate::error::FetchError;
use crate::record::{Fetched, WorkItem};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::stop::StopSignal;

/// One external call per item: an HTTP GET, a download, an LLM generation.
///
/// Implementations classify their own failures; they never sleep or retry.
pub trait Fetch {
    type Item: WorkItem;

    fn fetch(&mut self, item: &Self::Item) -> Result<Fetched, FetchError>;
}

/// Failure surfaced after the retry policy gave up.
#[derive(Debug)]
pub struct FetchFailure {
    pub error: FetchError,
    pub attempts: u32,
}

impl FetchFailure {
    /// Whether the caller should cool down before the next attempt.
    pub fn needs_cooldown(&self) -> bool {
        self.error.is_retryable()
    }
}

/// Longer pause after retries are exhausted on a connectivity-class error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub duration: Duration,
    /// `None` keeps cooling down and retrying the same item indefinitely.
    pub max_rounds: Option<u32>,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(120),
            max_rounds: None,
        }
    }
}

impl CooldownPolicy {
    /// Whether another cooldown round is allowed after `rounds` have been used.
    pub fn allows(&self, rounds: u32) -> bool {
        self.max_rounds.map_or(true, |max| rounds < max)
    }
}

/// Wraps a [`Fetch`] with bounded exponential-backoff retries.
pub struct PacedFetcher<F> {
    inner: F,
    retry: RetryPolicy,
}

impl<F: Fetch> PacedFetcher<F> {
    pub fn new(inner: F, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }

    /// Fetch one item. On success returns the payload and the attempt count.
    ///
    /// Backoff waits end early on a stop request.
    pub fn fetch(
        &mut self,
        item: &F::Item,
        stop: &StopSignal,
    ) -> Result<(Fetched, u32), FetchFailure> {
        let label = item.key().to_string();
        let inner = &mut self.inner;
        let (result, attempts) = retry_with_backoff(&label, &self.retry, stop, || {
            let start = Instant::now();
            inner.fetch(item).map(|mut fetched| {
                if fetched.latency.is_none() {
                    fetched.latency = Some(start.elapsed());
                }
                fetched
            })
        });
        match result {
            Ok(fetched) => Ok((fetched, attempts)),
            Err(error) => Err(FetchFailure { error, attempts }),
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Key;
    use serde_json::json;

    struct Id(u64);

    impl WorkItem for Id {
        fn key(&self) -> Key {
            Key::Numeric(self.0)
        }
    }

    /// Fails transiently `fail_times` times, then succeeds.
    struct Flaky {
        fail_times: u32,
        calls: u32,
    }

    impl Fetch for Flaky {
        type Item = Id;

        fn fetch(&mut self, item: &Id) -> Result<Fetched, FetchError> {
            self.calls += 1;
            if self.calls <= self.fail_times {
                Err(FetchError::Transient("connection reset".into()))
            } else {
                Ok(Fetched::new(json!({ "id": item.0 })))
            }
        }
    }

    #[test]
    fn retries_then_succeeds() {
        let mut f = PacedFetcher::new(
            Flaky {
                fail_times: 2,
                calls: 0,
            },
            RetryPolicy::immediate(5),
        );
        let (fetched, attempts) = f.fetch(&Id(7), &StopSignal::new()).unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(fetched.payload, json!({"id": 7}));
        assert!(fetched.latency.is_some());
    }

    #[test]
    fn exhausted_retries_need_cooldown() {
        let mut f = PacedFetcher::new(
            Flaky {
                fail_times: 10,
                calls: 0,
            },
            RetryPolicy::immediate(3),
        );
        let failure = f.fetch(&Id(1), &StopSignal::new()).unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure.needs_cooldown());
        assert_eq!(f.inner().calls, 3);
    }

    #[test]
    fn cooldown_rounds_bounded() {
        let bounded = CooldownPolicy {
            duration: Duration::ZERO,
            max_rounds: Some(2),
        };
        assert!(bounded.allows(0));
        assert!(bounded.allows(1));
        assert!(!bounded.allows(2));
        assert!(CooldownPolicy::default().allows(u32::MAX - 1));
    }
}
