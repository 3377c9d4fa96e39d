//! Stop requests from SIGINT/SIGTERM, checked between items

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Run-scoped stop flag. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal wired to SIGINT and SIGTERM.
    ///
    /// The first signal requests a stop after the current item; a second one
    /// terminates the process with status 130.
    pub fn install() -> std::io::Result<Self> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::flag;

        let signal = Self::new();
        for sig in [SIGINT, SIGTERM] {
            flag::register_conditional_shutdown(sig, 130, signal.flag.clone())?;
            flag::register(sig, signal.flag.clone())?;
        }
        Ok(signal)
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`, waking early on a stop request.
    ///
    /// Returns `true` if the sleep was cut short by a stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
