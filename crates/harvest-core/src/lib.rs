//! Harvest Core - resumable, rate-limited harvesting engine
//!
//! Pulls items from a source, skips the ones already recorded, fetches the
//! rest with retries, backoff and pacing, and appends exactly one record per
//! key to a crash-tolerant JSONL log. The log is later projected into CSV
//! tables. A worker-pool variant shards the pending items across threads
//! that share only the log.

pub mod append_log;
pub mod dedup;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod logging;
pub mod materialize;
pub mod pacer;
pub mod progress;
pub mod record;
pub mod retry;
pub mod sampling;
pub mod source;
pub mod stop;

// Re-exports for convenience
pub use append_log::{Append, AppendLog, LogRecords};
pub use dedup::{DedupStore, ResumeMode};
pub use dispatcher::{WorkDispatcher, partition};
pub use engine::{Pacing, RecordObserver, RunContext, RunSummary, harvest};
pub use error::{FetchError, HarvestError};
pub use fetcher::{CooldownPolicy, Fetch, PacedFetcher};
pub use http::{HttpClient, HttpSettings};
pub use logging::{Verbosity, init_logging};
pub use materialize::{
    IncrementalMaterializer, MaterializeStats, Materializer, Projection, TableRow, TableSpec,
    TableWriter, cleanup_tmp_files,
};
pub use pacer::BatchPacer;
pub use progress::{ProgressContext, SharedProgress};
pub use record::{Fetched, Key, KeyPart, ProcessedRecord, WorkItem};
pub use retry::RetryPolicy;
pub use sampling::{MissingKeys, SampleSize, Sampler};
pub use source::{ItemSource, ListSource};
pub use stop::StopSignal;
