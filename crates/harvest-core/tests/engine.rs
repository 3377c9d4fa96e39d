//! End-to-end tests of the harvesting engine over scripted fetchers.
//!
//! All pacing is zero, so nothing here sleeps.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use harvest_core::{
    AppendLog, DedupStore, Fetch, FetchError, Fetched, HarvestError, ItemSource, Key, KeyPart,
    ListSource, LogRecords, PacedFetcher, Pacing, ProcessedRecord, ProgressContext, ResumeMode,
    RetryPolicy, RunContext, StopSignal, WorkDispatcher, WorkItem, harvest,
};
use rustc_hash::FxHashMap;
use serde_json::json;
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct Id(u64);

impl WorkItem for Id {
    fn key(&self) -> Key {
        Key::Numeric(self.0)
    }
}

/// Per-key script: how many transient failures before success, or a
/// permanent failure.
#[derive(Default)]
struct Scripted {
    transient: FxHashMap<u64, u32>,
    permanent: BTreeSet<u64>,
    calls: FxHashMap<u64, u32>,
    /// Request a stop after this many successful fetches.
    stop_after: Option<(usize, StopSignal)>,
    successes: usize,
}

impl Fetch for Scripted {
    type Item = Id;

    fn fetch(&mut self, item: &Id) -> Result<Fetched, FetchError> {
        let calls = self.calls.entry(item.0).or_default();
        *calls += 1;
        if self.permanent.contains(&item.0) {
            return Err(FetchError::Permanent("missing Record section".into()));
        }
        if *calls <= self.transient.get(&item.0).copied().unwrap_or(0) {
            return Err(FetchError::Transient("connection reset".into()));
        }
        self.successes += 1;
        if let Some((n, stop)) = &self.stop_after {
            if self.successes >= *n {
                stop.request();
            }
        }
        Ok(Fetched::new(json!({ "id": item.0 })))
    }
}

fn context(log_path: &Path, mode: ResumeMode) -> RunContext {
    let done = DedupStore::load(log_path, mode).unwrap();
    RunContext {
        label: "test".into(),
        log: AppendLog::open(log_path, done).unwrap(),
        pacing: Pacing::immediate(),
        stop: StopSignal::new(),
        progress: Arc::new(ProgressContext::hidden()),
    }
}

fn read_log(path: &Path) -> Vec<ProcessedRecord> {
    LogRecords::open(path)
        .unwrap()
        .collect::<std::io::Result<_>>()
        .unwrap()
}

fn keys_of(records: &[ProcessedRecord]) -> BTreeSet<Key> {
    records.iter().map(|r| r.key.clone()).collect()
}

fn ids(range: std::ops::RangeInclusive<u64>) -> ListSource<Id> {
    ListSource::new(range.map(Id))
}

#[test]
fn permanent_and_transient_failures_end_to_end() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("log.jsonl");
    let ctx = context(&log_path, ResumeMode::Cursor);

    let script = Scripted {
        transient: [(7, 2)].into_iter().collect(),
        permanent: [5].into_iter().collect(),
        ..Default::default()
    };
    let mut fetcher = PacedFetcher::new(script, RetryPolicy::immediate(5));
    let summary = harvest(&ctx, &mut ids(1..=10), &mut fetcher, None).unwrap();

    assert_eq!(summary.succeeded, 9);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.cooldowns, 0);

    let records = read_log(&log_path);
    assert_eq!(records.len(), 10);

    let r5 = records.iter().find(|r| r.key == Key::Numeric(5)).unwrap();
    assert!(r5.payload.is_none());
    assert_eq!(r5.meta.error.as_deref(), Some("missing Record section"));

    let r7 = records.iter().find(|r| r.key == Key::Numeric(7)).unwrap();
    assert_eq!(r7.payload, Some(json!({ "id": 7 })));
    assert!(r7.meta.error.is_none());
    assert_eq!(r7.meta.attempts, 3);
}

#[test]
fn transient_failures_past_retries_cool_down_and_retry_same_item() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("log.jsonl");
    let ctx = context(&log_path, ResumeMode::Cursor);

    // 2 attempts per round: rounds 1 and 2 fail, round 3 succeeds
    let script = Scripted {
        transient: [(3, 4)].into_iter().collect(),
        ..Default::default()
    };
    let mut fetcher = PacedFetcher::new(script, RetryPolicy::immediate(2));
    let summary = harvest(&ctx, &mut ids(1..=4), &mut fetcher, None).unwrap();

    assert_eq!(summary.cooldowns, 2);
    assert_eq!(summary.succeeded, 4);
    let records = read_log(&log_path);
    let r3 = records.iter().find(|r| r.key == Key::Numeric(3)).unwrap();
    assert!(r3.payload.is_some());
    assert_eq!(r3.meta.attempts, 5);
}

#[test]
fn second_run_appends_nothing() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("log.jsonl");

    for _ in 0..2 {
        let ctx = context(&log_path, ResumeMode::Cursor);
        let mut fetcher = PacedFetcher::new(Scripted::default(), RetryPolicy::immediate(1));
        harvest(&ctx, &mut ids(1..=10), &mut fetcher, None).unwrap();
    }

    let ctx = context(&log_path, ResumeMode::Cursor);
    let mut fetcher = PacedFetcher::new(Scripted::default(), RetryPolicy::immediate(1));
    let summary = harvest(&ctx, &mut ids(1..=10), &mut fetcher, None).unwrap();
    assert_eq!(summary.skipped, 10);
    assert_eq!(summary.attempted, 0);
    assert!(fetcher.inner().calls.is_empty());

    let records = read_log(&log_path);
    assert_eq!(records.len(), 10);
    assert_eq!(keys_of(&records).len(), 10);
}

#[test]
fn interrupted_run_resumes_to_same_key_set() {
    let dir = TempDir::new().unwrap();

    // Uninterrupted reference run
    let full_path = dir.path().join("full.jsonl");
    let ctx = context(&full_path, ResumeMode::Cursor);
    let mut fetcher = PacedFetcher::new(Scripted::default(), RetryPolicy::immediate(1));
    harvest(&ctx, &mut ids(1..=20), &mut fetcher, None).unwrap();

    // Stopped after 6 successes, then resumed
    let log_path = dir.path().join("resumed.jsonl");
    let ctx = context(&log_path, ResumeMode::Cursor);
    let script = Scripted {
        stop_after: Some((6, ctx.stop.clone())),
        ..Default::default()
    };
    let mut fetcher = PacedFetcher::new(script, RetryPolicy::immediate(1));
    let first = harvest(&ctx, &mut ids(1..=20), &mut fetcher, None).unwrap();
    assert!(first.interrupted);
    assert_eq!(first.succeeded, 6);
    drop(ctx);

    let ctx = context(&log_path, ResumeMode::Cursor);
    let mut fetcher = PacedFetcher::new(Scripted::default(), RetryPolicy::immediate(1));
    let second = harvest(&ctx, &mut ids(1..=20), &mut fetcher, None).unwrap();
    assert!(!second.interrupted);
    assert_eq!(second.skipped, 6);
    assert_eq!(second.succeeded, 14);

    assert_eq!(keys_of(&read_log(&log_path)), keys_of(&read_log(&full_path)));
}

/// Fails transiently on the first page request, then serves a fixed list.
struct FlakyPages {
    inner: ListSource<Id>,
    failed_once: bool,
}

impl ItemSource for FlakyPages {
    type Item = Id;

    fn next_item(&mut self) -> Result<Option<Id>, FetchError> {
        if !self.failed_once {
            self.failed_once = true;
            return Err(FetchError::Transient("page timed out".into()));
        }
        self.inner.next_item()
    }
}

#[test]
fn source_errors_are_retried() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("log.jsonl");
    let ctx = context(&log_path, ResumeMode::DedupSet);
    let mut source = FlakyPages {
        inner: ids(1..=3),
        failed_once: false,
    };
    let mut fetcher = PacedFetcher::new(Scripted::default(), RetryPolicy::immediate(1));
    let summary = harvest(&ctx, &mut source, &mut fetcher, None).unwrap();
    assert_eq!(summary.succeeded, 3);
}

#[derive(Debug, Clone)]
struct Row {
    doc: String,
    para: i64,
}

impl WorkItem for Row {
    fn key(&self) -> Key {
        Key::Composite(vec![KeyPart::Text(self.doc.clone()), KeyPart::Int(self.para)])
    }

    fn context(&self) -> Option<serde_json::Value> {
        Some(json!({ "doc": self.doc, "para": self.para }))
    }
}

struct Generator {
    worker: usize,
    panic_on: Option<i64>,
}

impl Fetch for Generator {
    type Item = Row;

    fn fetch(&mut self, item: &Row) -> Result<Fetched, FetchError> {
        if self.panic_on == Some(item.para) {
            panic!("model client crashed");
        }
        Ok(Fetched::new(json!({ "question": format!("q{}", item.para), "worker": self.worker }))
            .with_tokens(10, 3))
    }
}

fn rows(n: i64) -> Vec<Row> {
    (0..n)
        .map(|i| Row {
            doc: format!("doc-{}", i % 5),
            para: i,
        })
        .collect()
}

#[test]
fn dispatcher_processes_each_item_exactly_once() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("cache_result.jsonl");
    let ctx = context(&log_path, ResumeMode::DedupSet);
    let built = AtomicUsize::new(0);

    let summary = WorkDispatcher::new(&ctx, 4)
        .run(rows(37), |worker| {
            built.fetch_add(1, Ordering::Relaxed);
            Ok(Generator {
                worker,
                panic_on: None,
            })
        })
        .unwrap();

    assert_eq!(built.load(Ordering::Relaxed), 4);
    assert_eq!(summary.succeeded, 37);
    assert_eq!(summary.total, 37);

    let records = read_log(&log_path);
    assert_eq!(records.len(), 37);
    let expected: BTreeSet<Key> = rows(37).iter().map(WorkItem::key).collect();
    assert_eq!(keys_of(&records), expected);

    // Contiguous shards: worker 0 holds the first 10 items
    let first_worker: BTreeSet<i64> = records
        .iter()
        .filter(|r| r.payload.as_ref().unwrap()["worker"] == 0)
        .map(|r| r.item_field("para").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(first_worker, (0..10).collect());
}

#[test]
fn dispatcher_rerun_skips_done_items() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("cache_result.jsonl");
    let make = |worker| {
        Ok::<_, FetchError>(Generator {
            worker,
            panic_on: None,
        })
    };

    let ctx = context(&log_path, ResumeMode::DedupSet);
    WorkDispatcher::new(&ctx, 3).run(rows(20), make).unwrap();
    drop(ctx);

    let ctx = context(&log_path, ResumeMode::DedupSet);
    let summary = WorkDispatcher::new(&ctx, 3).run(rows(25), make).unwrap();
    assert_eq!(summary.skipped, 20);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(read_log(&log_path).len(), 25);
}

#[test]
fn worker_panic_is_fatal() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("cache_result.jsonl");
    let ctx = context(&log_path, ResumeMode::DedupSet);

    let err = WorkDispatcher::new(&ctx, 4)
        .run(rows(37), |worker| {
            Ok(Generator {
                worker,
                panic_on: Some(15),
            })
        })
        .unwrap_err();
    match err {
        HarvestError::WorkerPanicked { worker, message } => {
            assert_eq!(worker, 1);
            assert!(message.contains("model client crashed"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn client_build_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir.path().join("log.jsonl"), ResumeMode::DedupSet);
    let err = WorkDispatcher::new(&ctx, 2)
        .run(rows(4), |_| {
            Err::<Generator, _>(FetchError::Fatal("missing API key".into()))
        })
        .unwrap_err();
    assert!(matches!(err, HarvestError::Fetch(FetchError::Fatal(_))));
}
