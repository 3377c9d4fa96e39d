//! Worker pool over contiguous shards of pending items
//!
//! Each worker builds its own fetch client, walks its shard in order with a
//! short delay between items, and appends through the shared [`AppendLog`].
//! The log's lock is the only state shared between workers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use indicatif::ProgressBar;

use crate::engine::{ItemOutcome, RunContext, RunSummary, process_item};
use crate::error::{FetchError, HarvestError};
use crate::fetcher::{Fetch, PacedFetcher};
use crate::pacer::BatchPacer;
use crate::record::WorkItem;

/// Split `items` into `workers` contiguous shards of near-equal size.
///
/// The first `len % workers` shards get one extra item. Shards may be empty
/// when there are fewer items than workers.
pub fn partition<T>(items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let workers = workers.max(1);
    let base = items.len() / workers;
    let rem = items.len() % workers;

    let mut shards = Vec::with_capacity(workers);
    let mut iter = items.into_iter();
    for i in 0..workers {
        let size = base + usize::from(i < rem);
        shards.push(iter.by_ref().take(size).collect());
    }
    shards
}

/// Every pending item must end up with exactly one outcome unless the run
/// was stopped.
pub fn check_consistency(expected: usize, summary: &RunSummary) -> Result<(), HarvestError> {
    let processed = (summary.appended() + summary.duplicates) as usize;
    if !summary.interrupted && processed != expected {
        log::error!("worker consistency check failed: {processed} of {expected} items processed");
        return Err(HarvestError::WorkerMismatch {
            expected,
            processed,
        });
    }
    Ok(())
}

/// Runs pending items across a fixed pool of worker threads.
pub struct WorkDispatcher<'a> {
    ctx: &'a RunContext,
    workers: usize,
}

impl<'a> WorkDispatcher<'a> {
    pub fn new(ctx: &'a RunContext, workers: usize) -> Self {
        Self {
            ctx,
            workers: workers.max(1),
        }
    }

    /// Process `items`, skipping keys already in the log.
    ///
    /// `make_fetcher(worker)` is called once inside each worker thread, so no
    /// client is ever shared. Blocks until every worker has returned.
    pub fn run<T, F, M>(&self, items: Vec<T>, make_fetcher: M) -> Result<RunSummary, HarvestError>
    where
        T: WorkItem + Send,
        F: Fetch<Item = T>,
        M: Fn(usize) -> Result<F, FetchError> + Sync,
    {
        let start = Instant::now();
        let total = items.len() as u64;
        let pending: Vec<T> = items
            .into_iter()
            .filter(|item| !self.ctx.log.contains(&item.key()))
            .collect();
        let expected = pending.len();

        let mut summary = RunSummary {
            total,
            skipped: total - expected as u64,
            ..RunSummary::default()
        };
        if expected == 0 {
            log::info!("{}: nothing to do, all {total} items already processed", self.ctx.label);
            summary.elapsed = start.elapsed();
            return Ok(summary);
        }

        let shards: Vec<Vec<T>> = partition(pending, self.workers)
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        log::info!(
            "{}: {expected} pending items ({} already done) across {} workers",
            self.ctx.label,
            summary.skipped,
            shards.len()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(shards.len())
            .thread_name(|i| format!("harvest-worker-{i}"))
            .build()
            .map_err(|e| HarvestError::Io(std::io::Error::other(e)))?;

        let overall = self.ctx.progress.item_bar(&self.ctx.label, Some(expected as u64));
        let abort = AtomicBool::new(false);
        let results: Mutex<Vec<(usize, Result<RunSummary, HarvestError>)>> =
            Mutex::new(Vec::with_capacity(shards.len()));

        pool.scope(|s| {
            for (worker, shard) in shards.into_iter().enumerate() {
                let (make_fetcher, abort, results, overall) = (&make_fetcher, &abort, &results, &overall);
                s.spawn(move |_| {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        self.run_shard(worker, shard, make_fetcher, abort, overall)
                    }))
                    .unwrap_or_else(|payload| {
                        abort.store(true, Ordering::Relaxed);
                        Err(HarvestError::WorkerPanicked {
                            worker,
                            message: panic_message(payload.as_ref()),
                        })
                    });
                    if outcome.is_err() {
                        abort.store(true, Ordering::Relaxed);
                    }
                    results
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .push((worker, outcome));
                });
            }
        });
        overall.finish_and_clear();

        let mut results = results
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        results.sort_by_key(|(worker, _)| *worker);
        for (_, outcome) in results {
            summary.merge(&outcome?);
        }
        summary.elapsed = start.elapsed();

        check_consistency(expected, &summary)?;
        if summary.interrupted {
            log::warn!("{}: stopped, rerun to resume", self.ctx.label);
        }
        Ok(summary)
    }

    fn run_shard<T, F, M>(
        &self,
        worker: usize,
        shard: Vec<T>,
        make_fetcher: &M,
        abort: &AtomicBool,
        overall: &ProgressBar,
    ) -> Result<RunSummary, HarvestError>
    where
        T: WorkItem,
        F: Fetch<Item = T>,
        M: Fn(usize) -> Result<F, FetchError>,
    {
        let ctx = self.ctx;
        let start = Instant::now();
        let client = make_fetcher(worker).map_err(|e| {
            log::error!("worker {worker}: cannot build client: {e}");
            HarvestError::Fetch(e)
        })?;
        let mut fetcher = PacedFetcher::new(client, ctx.pacing.retry.clone());
        let pacer = BatchPacer::request_only(ctx.pacing.request_delay);
        let bar = ctx
            .progress
            .item_bar(&format!("worker {worker}"), Some(shard.len() as u64));
        log::debug!("worker {worker}: {} items", shard.len());

        let mut summary = RunSummary::empty();
        let last = shard.len().saturating_sub(1);
        for (i, item) in shard.into_iter().enumerate() {
            if abort.load(Ordering::Relaxed) || ctx.stop.is_stopped() {
                summary.interrupted = true;
                break;
            }
            summary.total += 1;
            summary.attempted += 1;
            match process_item(
                &mut fetcher,
                &item,
                &ctx.log,
                &ctx.pacing,
                &ctx.stop,
                &mut summary.cooldowns,
            )? {
                ItemOutcome::Appended(record) if record.is_failure() => summary.failed += 1,
                ItemOutcome::Appended(_) => summary.succeeded += 1,
                ItemOutcome::Duplicate => summary.duplicates += 1,
                ItemOutcome::Interrupted => {
                    summary.attempted -= 1;
                    summary.interrupted = true;
                    break;
                }
            }
            bar.inc(1);
            overall.inc(1);
            if i < last && ctx.stop.sleep(pacer.after_failure().delay) {
                summary.interrupted = true;
                break;
            }
        }
        bar.finish_and_clear();
        summary.elapsed = start.elapsed();
        log::debug!(
            "worker {worker}: done, {} succeeded, {} failed",
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_37_over_4() {
        let shards = partition((0..37).collect::<Vec<_>>(), 4);
        let sizes: Vec<usize> = shards.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 9, 9, 9]);
        let flat: Vec<i32> = shards.into_iter().flatten().collect();
        assert_eq!(flat, (0..37).collect::<Vec<_>>());
    }

    #[test]
    fn partition_fewer_items_than_workers() {
        let sizes: Vec<usize> = partition(vec![1, 2], 4).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
    }

    #[test]
    fn partition_zero_workers_means_one() {
        let shards = partition(vec![1, 2, 3], 0);
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0], vec![1, 2, 3]);
    }

    #[test]
    fn consistency_check_catches_lost_items() {
        let summary = RunSummary {
            succeeded: 30,
            failed: 6,
            ..Default::default()
        };
        let err = check_consistency(37, &summary).unwrap_err();
        assert!(matches!(
            err,
            HarvestError::WorkerMismatch {
                expected: 37,
                processed: 36
            }
        ));
    }

    #[test]
    fn consistency_check_ignores_stopped_runs() {
        let summary = RunSummary {
            succeeded: 5,
            interrupted: true,
            ..Default::default()
        };
        assert!(check_consistency(37, &summary).is_ok());
    }
}
