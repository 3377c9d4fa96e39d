//! Inter-request delays and periodic batch pauses

use std::time::Duration;

/// Pause to apply after one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pause {
    pub delay: Duration,
    /// True when this success closed a batch and `delay` includes the long pause.
    pub batch_complete: bool,
}

/// Success-counting pacer.
///
/// Every operation is followed by `request_delay`. Every `batch_size`-th
/// cumulative success adds `batch_delay` on top. Failures never advance the
/// batch counter.
#[derive(Debug, Clone)]
pub struct BatchPacer {
    request_delay: Duration,
    batch_size: u64,
    batch_delay: Duration,
    successes: u64,
    long_pauses: u64,
}

impl BatchPacer {
    /// `batch_size == 0` disables batch pauses.
    pub fn new(request_delay: Duration, batch_size: u64, batch_delay: Duration) -> Self {
        Self {
            request_delay,
            batch_size,
            batch_delay,
            successes: 0,
            long_pauses: 0,
        }
    }

    /// Pacer that only spaces out requests.
    pub fn request_only(request_delay: Duration) -> Self {
        Self::new(request_delay, 0, Duration::ZERO)
    }

    /// Pause owed after the `success_count`-th cumulative success.
    pub fn should_pause_after(&self, success_count: u64) -> Duration {
        if self.closes_batch(success_count) {
            self.request_delay + self.batch_delay
        } else {
            self.request_delay
        }
    }

    fn closes_batch(&self, success_count: u64) -> bool {
        self.batch_size > 0 && success_count > 0 && success_count % self.batch_size == 0
    }

    pub fn after_success(&mut self) -> Pause {
        self.successes += 1;
        let batch_complete = self.closes_batch(self.successes);
        if batch_complete {
            self.long_pauses += 1;
        }
        Pause {
            delay: self.should_pause_after(self.successes),
            batch_complete,
        }
    }

    pub fn after_failure(&self) -> Pause {
        Pause {
            delay: self.request_delay,
            batch_complete: false,
        }
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn long_pauses(&self) -> u64 {
        self.long_pauses
    }

    pub fn batch_delay(&self) -> Duration {
        self.batch_delay
    }
}
