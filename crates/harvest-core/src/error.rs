//! Classified fetch errors and fatal run errors

use crate::record::Key;

/// Outcome class of a single external call.
///
/// Fetchers return this instead of panicking or bubbling transport errors,
/// so the engine can decide between retry, skip and abort.
#[derive(Debug)]
pub enum FetchError {
    /// Connection reset, timeout, throttling. Worth retrying.
    Transient(String),
    /// Specific to this item's data (malformed payload, missing field, 404).
    Permanent(String),
    /// The run cannot continue (credentials rejected, client misconfigured).
    Fatal(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(m) => write!(f, "transient: {m}"),
            Self::Permanent(m) => write!(f, "permanent: {m}"),
            Self::Fatal(m) => write!(f, "fatal: {m}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Message without the class prefix, as stored in a failed record.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) | Self::Fatal(m) => m,
        }
    }
}

/// Run-level error. Anything that reaches this type aborts the run.
#[derive(Debug)]
pub enum HarvestError {
    /// Output location unreadable or unwritable.
    Io(std::io::Error),
    /// A fetch classified as fatal, or a source page that cannot be skipped.
    Fetch(FetchError),
    /// Invalid settings detected before any fetching started.
    Config(String),
    /// Transient failures persisted through every allowed cooldown round.
    Outage { key: Key, rounds: u32, last: FetchError },
    /// Workers returned fewer outcomes than items they were handed.
    WorkerMismatch { expected: usize, processed: usize },
    /// A worker thread panicked.
    WorkerPanicked { worker: usize, message: String },
    /// Persisted sample keys no longer present in the item source.
    SampleMismatch { missing: usize },
}

impl std::fmt::Display for HarvestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Fetch(e) => write!(f, "{e}"),
            Self::Config(m) => write!(f, "invalid configuration: {m}"),
            Self::Outage { key, rounds, last } => write!(
                f,
                "item {key} still failing after {rounds} cooldown rounds ({last})"
            ),
            Self::WorkerMismatch {
                expected,
                processed,
            } => write!(
                f,
                "workers processed {processed} of {expected} assigned items"
            ),
            Self::WorkerPanicked { worker, message } => {
                write!(f, "worker {worker} panicked: {message}")
            }
            Self::SampleMismatch { missing } => write!(
                f,
                "{missing} persisted sample keys are missing from the item source"
            ),
        }
    }
}

impl std::error::Error for HarvestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(e: serde_json::Error) -> Self {
        Self::Io(std::io::Error::other(e))
    }
}
