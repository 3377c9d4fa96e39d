//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: indicatif item bars (one per run, or one per worker plus an
//! overall bar). Non-TTY mode: hidden bars, periodic log lines instead.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Emit a non-TTY progress line every N items.
pub const LOG_INTERVAL: u64 = 500;

/// Item bar with a known total
fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<16.dim} {bar:30.green/dim} {pos:>7}/{len:7} {eta:>4} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Spinner for unbounded sources (paginated listings without a total)
fn counter_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix:<16.dim} {pos:>7} items {wide_msg:.dim}")
        .expect("invalid template")
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: std::io::stderr().is_terminal(),
        }
    }

    /// Context that never draws. Used by tests and `--quiet` style callers.
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: false,
        }
    }

    /// Bar for one harvesting run or one worker shard.
    ///
    /// `total = None` shows a spinner with a running count.
    pub fn item_bar(&self, name: &str, total: Option<u64>) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = match total {
            Some(n) => {
                let pb = self.multi.add(ProgressBar::new(n));
                pb.set_style(bar_style());
                pb
            }
            None => {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(counter_style());
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            }
        };
        // Truncate long names to keep bars aligned
        let display: String = name.chars().take(16).collect();
        pb.set_prefix(display);
        pb
    }

    /// Print a line above managed progress bars (avoids interference).
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.is_tty {
            let _ = self.multi.println(msg);
        } else {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

/// Log a progress line in non-TTY mode every [`LOG_INTERVAL`] items.
pub fn log_progress(label: &str, done: u64, total: Option<u64>) {
    if done == 0 || done % LOG_INTERVAL != 0 {
        return;
    }
    match total {
        Some(t) => log::info!("{label}: {}/{}", fmt_num(done as usize), fmt_num(t as usize)),
        None => log::info!("{label}: {} items", fmt_num(done as usize)),
    }
}

/// Format number with thousand separators.
pub fn fmt_num(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_num_small() {
        assert_eq!(fmt_num(0), "0");
        assert_eq!(fmt_num(123), "123");
    }

    #[test]
    fn fmt_num_thousands() {
        assert_eq!(fmt_num(1_000), "1,000");
        assert_eq!(fmt_num(123_456), "123,456");
        assert_eq!(fmt_num(1_234_567), "1,234,567");
    }

    #[test]
    fn hidden_context_gives_hidden_bars() {
        let ctx = ProgressContext::hidden();
        assert!(!ctx.is_tty());
        assert!(ctx.item_bar("pubchem", Some(10)).is_hidden());
        assert!(ctx.item_bar("chemrxiv", None).is_hidden());
    }
}
