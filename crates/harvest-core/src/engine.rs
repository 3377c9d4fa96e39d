//! Sequential harvesting loop
//!
//! ItemSource → already-done filter → paced, retried fetch → AppendLog.
//! Items are processed in source order on the calling thread. A stop request
//! is honored between items and during pauses, never inside an append.

use std::time::{Duration, Instant};

use crate::append_log::{Append, AppendLog};
use crate::error::HarvestError;
use crate::fetcher::{CooldownPolicy, Fetch, PacedFetcher};
use crate::pacer::BatchPacer;
use crate::progress::{SharedProgress, log_progress};
use crate::record::{ProcessedRecord, WorkItem};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::source::ItemSource;
use crate::stop::StopSignal;

/// Timing knobs of one run.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub retry: RetryPolicy,
    pub request_delay: Duration,
    /// Successes per batch; 0 disables batch pauses.
    pub batch_size: u64,
    pub batch_delay: Duration,
    pub cooldown: CooldownPolicy,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_delay: Duration::from_secs(3),
            batch_size: 1000,
            batch_delay: Duration::from_secs(120),
            cooldown: CooldownPolicy::default(),
        }
    }
}

impl Pacing {
    /// No sleeping anywhere. Retries and cooldown rounds still count.
    pub fn immediate() -> Self {
        Self {
            retry: RetryPolicy::immediate(5),
            request_delay: Duration::ZERO,
            batch_size: 0,
            batch_delay: Duration::ZERO,
            cooldown: CooldownPolicy {
                duration: Duration::ZERO,
                max_rounds: None,
            },
        }
    }

    pub fn batch_pacer(&self) -> BatchPacer {
        BatchPacer::new(self.request_delay, self.batch_size, self.batch_delay)
    }
}

/// Everything a run owns: the log, timing, stop flag and progress display.
pub struct RunContext {
    pub label: String,
    pub log: AppendLog,
    pub pacing: Pacing,
    pub stop: StopSignal,
    pub progress: SharedProgress,
}

/// Notified after every record that lands in the log.
///
/// Used to materialize output while the run is still going.
pub trait RecordObserver {
    fn on_append(&mut self, record: &ProcessedRecord) -> Result<(), HarvestError>;

    /// Called once when the run ends, stopped or not.
    fn finish(&mut self) -> Result<(), HarvestError> {
        Ok(())
    }
}

/// What happened to one item.
#[derive(Debug)]
pub(crate) enum ItemOutcome {
    Appended(ProcessedRecord),
    /// Another writer got there first.
    Duplicate,
    /// Stop requested during a backoff or cooldown; nothing was appended.
    Interrupted,
}

/// Fetch one item through retries and cooldown rounds, then append its record.
pub(crate) fn process_item<F: Fetch>(
    fetcher: &mut PacedFetcher<F>,
    item: &F::Item,
    log: &AppendLog,
    pacing: &Pacing,
    stop: &StopSignal,
    cooldowns: &mut u64,
) -> Result<ItemOutcome, HarvestError> {
    let key = item.key();
    let mut rounds = 0u32;
    let mut attempts = 0u32;

    let record = loop {
        match fetcher.fetch(item, stop) {
            Ok((fetched, n)) => {
                attempts += n;
                log::debug!("{key}: fetched in {attempts} attempt(s)");
                break ProcessedRecord::success(key.clone(), item.context(), fetched, attempts);
            }
            Err(failure) if failure.error.is_fatal() => {
                log::error!("{key}: {}", failure.error);
                return Err(HarvestError::Fetch(failure.error));
            }
            Err(failure) if failure.needs_cooldown() && stop.is_stopped() => {
                log::debug!("{key}: {} before stop, not recorded", failure.error);
                return Ok(ItemOutcome::Interrupted);
            }
            Err(failure) if failure.needs_cooldown() => {
                attempts += failure.attempts;
                if !pacing.cooldown.allows(rounds) {
                    return Err(HarvestError::Outage {
                        key,
                        rounds,
                        last: failure.error,
                    });
                }
                rounds += 1;
                *cooldowns += 1;
                log::warn!(
                    "{key}: {} after {} attempts, cooling down for {:?} (round {rounds})",
                    failure.error,
                    failure.attempts,
                    pacing.cooldown.duration
                );
                if stop.sleep(pacing.cooldown.duration) {
                    return Ok(ItemOutcome::Interrupted);
                }
            }
            Err(failure) => {
                attempts += failure.attempts;
                log::warn!("{key}: {}", failure.error);
                break ProcessedRecord::failure(key.clone(), item.context(), &failure.error, attempts);
            }
        }
    };

    match log.append(&record)? {
        Append::Written => Ok(ItemOutcome::Appended(record)),
        Append::Duplicate => Ok(ItemOutcome::Duplicate),
    }
}

enum Next<T> {
    Item(T),
    Exhausted,
    Interrupted,
}

/// Pull the next item, giving source errors the same retry and cooldown
/// treatment as fetches. A page that fails permanently cannot be skipped.
fn next_from_source<S: ItemSource>(
    source: &mut S,
    pacing: &Pacing,
    stop: &StopSignal,
    cooldowns: &mut u64,
) -> Result<Next<S::Item>, HarvestError> {
    let mut rounds = 0u32;
    loop {
        let (result, attempts) =
            retry_with_backoff("source", &pacing.retry, stop, || source.next_item());
        match result {
            Ok(Some(item)) => return Ok(Next::Item(item)),
            Ok(None) => return Ok(Next::Exhausted),
            Err(e) if e.is_retryable() && stop.is_stopped() => {
                log::debug!("source: {e} before stop");
                return Ok(Next::Interrupted);
            }
            Err(e) if e.is_retryable() && pacing.cooldown.allows(rounds) => {
                rounds += 1;
                *cooldowns += 1;
                log::warn!(
                    "source: {e} after {attempts} attempts, cooling down for {:?} (round {rounds})",
                    pacing.cooldown.duration
                );
                if stop.sleep(pacing.cooldown.duration) {
                    return Ok(Next::Interrupted);
                }
            }
            Err(e) => {
                log::error!("source: {e}");
                return Err(HarvestError::Fetch(e));
            }
        }
    }
}

/// Run one sequential harvest to completion or until stopped.
///
/// Items whose key already has a record are skipped without any request or
/// delay. The observer, if any, sees every record this run appends.
pub fn harvest<S, F>(
    ctx: &RunContext,
    source: &mut S,
    fetcher: &mut PacedFetcher<F>,
    mut observer: Option<&mut dyn RecordObserver>,
) -> Result<RunSummary, HarvestError>
where
    S: ItemSource,
    F: Fetch<Item = S::Item>,
{
    let start = Instant::now();
    let total_hint = source.size_hint();
    let bar = ctx.progress.item_bar(&ctx.label, total_hint);
    let mut pacer = ctx.pacing.batch_pacer();
    let mut summary = RunSummary::empty();

    let result = (|| -> Result<(), HarvestError> {
        loop {
            if ctx.stop.is_stopped() {
                summary.interrupted = true;
                return Ok(());
            }
            let item = match next_from_source(source, &ctx.pacing, &ctx.stop, &mut summary.cooldowns)? {
                Next::Item(item) => item,
                Next::Exhausted => return Ok(()),
                Next::Interrupted => {
                    summary.interrupted = true;
                    return Ok(());
                }
            };
            summary.total += 1;

            let key = item.key();
            if ctx.log.contains(&key) {
                summary.skipped += 1;
                bar.inc(1);
                continue;
            }

            summary.attempted += 1;
            let outcome = process_item(
                fetcher,
                &item,
                &ctx.log,
                &ctx.pacing,
                &ctx.stop,
                &mut summary.cooldowns,
            )?;
            let pause = match outcome {
                ItemOutcome::Appended(record) => {
                    let pause = if record.is_failure() {
                        summary.failed += 1;
                        pacer.after_failure()
                    } else {
                        summary.succeeded += 1;
                        pacer.after_success()
                    };
                    if let Some(obs) = observer.as_deref_mut() {
                        obs.on_append(&record)?;
                    }
                    pause
                }
                ItemOutcome::Duplicate => {
                    summary.duplicates += 1;
                    pacer.after_failure()
                }
                ItemOutcome::Interrupted => {
                    summary.attempted -= 1;
                    summary.interrupted = true;
                    return Ok(());
                }
            };

            bar.inc(1);
            if !ctx.progress.is_tty() {
                log_progress(&ctx.label, summary.total, total_hint);
            }
            if pause.batch_complete {
                log::info!(
                    "{}: batch complete ({} successes), pausing for {:?}",
                    ctx.label,
                    pacer.successes(),
                    pause.delay
                );
            }
            if ctx.stop.sleep(pause.delay) {
                summary.interrupted = true;
                return Ok(());
            }
        }
    })();

    if let Some(obs) = observer {
        obs.finish()?;
    }
    bar.finish_and_clear();
    result?;

    summary.long_pauses = pacer.long_pauses();
    summary.elapsed = start.elapsed();
    if summary.interrupted {
        log::warn!("{}: stopped, rerun to resume", ctx.label);
    }
    Ok(summary)
}

/// Counts from one run (or the merge of several worker runs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items pulled from the source.
    pub total: u64,
    /// Items that went to the fetcher.
    pub attempted: u64,
    pub succeeded: u64,
    /// Permanent failures recorded with an error.
    pub failed: u64,
    /// Fetched but not appended because the key was already present.
    pub duplicates: u64,
    /// Already done before this run.
    pub skipped: u64,
    pub long_pauses: u64,
    pub cooldowns: u64,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Records appended by this run.
    pub fn appended(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Fold another summary into this one. Elapsed time takes the maximum,
    /// since merged summaries come from workers running side by side.
    pub fn merge(&mut self, other: &RunSummary) {
        self.total += other.total;
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.long_pauses += other.long_pauses;
        self.cooldowns += other.cooldowns;
        self.interrupted |= other.interrupted;
        self.elapsed = self.elapsed.max(other.elapsed);
    }

    pub fn log(&self, label: &str) {
        log::info!("=== {label} ===");
        log::info!(
            "Items: {} seen, {} skipped as done, {} attempted",
            self.total,
            self.skipped,
            self.attempted
        );
        log::info!(
            "Records: {} succeeded, {} failed, {} duplicates",
            self.succeeded,
            self.failed,
            self.duplicates
        );
        log::info!(
            "Pauses: {} batch, {} cooldown",
            self.long_pauses,
            self.cooldowns
        );
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
        if self.appended() > 0 && self.elapsed.as_secs_f64() > 0.0 {
            log::info!(
                "Throughput: {:.2} records/sec",
                self.appended() as f64 / self.elapsed.as_secs_f64()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{DedupStore, ResumeMode};
    use crate::error::FetchError;
    use crate::progress::ProgressContext;
    use crate::record::{Fetched, Key};
    use crate::source::ListSource;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct N(u64);

    impl WorkItem for N {
        fn key(&self) -> Key {
            Key::Numeric(self.0)
        }
    }

    struct AlwaysDown;

    impl Fetch for AlwaysDown {
        type Item = N;

        fn fetch(&mut self, _: &N) -> Result<Fetched, FetchError> {
            Err(FetchError::Transient("connection refused".into()))
        }
    }

    struct Echo;

    impl Fetch for Echo {
        type Item = N;

        fn fetch(&mut self, item: &N) -> Result<Fetched, FetchError> {
            Ok(Fetched::new(json!({ "n": item.0 })))
        }
    }

    fn ctx(dir: &TempDir, pacing: Pacing) -> RunContext {
        let path = dir.path().join("log.jsonl");
        RunContext {
            label: "test".into(),
            log: AppendLog::open(&path, DedupStore::empty(ResumeMode::Cursor)).unwrap(),
            pacing,
            stop: StopSignal::new(),
            progress: Arc::new(ProgressContext::hidden()),
        }
    }

    #[test]
    fn bounded_cooldowns_abort_with_outage() {
        let dir = TempDir::new().unwrap();
        let mut pacing = Pacing::immediate();
        pacing.retry = RetryPolicy::immediate(2);
        pacing.cooldown.max_rounds = Some(3);
        let ctx = ctx(&dir, pacing);

        let mut fetcher = PacedFetcher::new(AlwaysDown, ctx.pacing.retry.clone());
        let err = harvest(&ctx, &mut ListSource::new([N(1)]), &mut fetcher, None).unwrap_err();
        match err {
            HarvestError::Outage { key, rounds, .. } => {
                assert_eq!(key, Key::Numeric(1));
                assert_eq!(rounds, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ctx.log.appended(), 0);
    }

    /// Requests a stop, then fails the way a dropped connection does.
    struct StopThenDown(StopSignal);

    impl Fetch for StopThenDown {
        type Item = N;

        fn fetch(&mut self, _: &N) -> Result<Fetched, FetchError> {
            self.0.request();
            Err(FetchError::Transient("connection reset".into()))
        }
    }

    #[test]
    fn stop_during_backoff_records_nothing() {
        let dir = TempDir::new().unwrap();
        let mut pacing = Pacing::immediate();
        pacing.retry = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        pacing.cooldown.max_rounds = Some(0);
        let ctx = ctx(&dir, pacing);

        let start = Instant::now();
        let mut fetcher =
            PacedFetcher::new(StopThenDown(ctx.stop.clone()), ctx.pacing.retry.clone());
        let summary = harvest(&ctx, &mut ListSource::new([N(1), N(2)]), &mut fetcher, None).unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(ctx.log.appended(), 0);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn stop_before_start_processes_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir, Pacing::immediate());
        ctx.stop.request();
        let mut fetcher = PacedFetcher::new(Echo, RetryPolicy::immediate(1));
        let summary = harvest(&ctx, &mut ListSource::new([N(1), N(2)]), &mut fetcher, None).unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.attempted, 0);
    }

    #[test]
    fn batch_pauses_counted() {
        let dir = TempDir::new().unwrap();
        let mut pacing = Pacing::immediate();
        pacing.batch_size = 3;
        let ctx = ctx(&dir, pacing);
        let mut fetcher = PacedFetcher::new(Echo, RetryPolicy::immediate(1));
        let summary =
            harvest(&ctx, &mut ListSource::new((1..=10).map(N)), &mut fetcher, None).unwrap();
        assert_eq!(summary.succeeded, 10);
        assert_eq!(summary.long_pauses, 3);
    }

    #[test]
    fn summary_merge_adds_counts() {
        let mut a = RunSummary {
            succeeded: 3,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        let b = RunSummary {
            succeeded: 4,
            failed: 1,
            interrupted: true,
            elapsed: Duration::from_secs(5),
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.appended(), 8);
        assert!(a.interrupted);
        assert_eq!(a.elapsed, Duration::from_secs(5));
    }

    #[test]
    fn summary_log_does_not_panic() {
        RunSummary::empty().log("empty");
    }
}
