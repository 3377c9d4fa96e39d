//! Resume state rebuilt from an existing append log

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::record::Key;

/// How previously processed keys are remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Contiguous numeric key space: only the high-water mark is kept.
    Cursor,
    /// Arbitrary keys: every processed key is kept.
    DedupSet,
}

#[derive(Deserialize)]
struct KeyOnly {
    key: Key,
}

/// The "already done" predicate for one run.
///
/// Built once from persisted output before fetching starts, then extended by
/// the append log as new records land.
#[derive(Debug)]
pub struct DedupStore {
    mode: ResumeMode,
    cursor: Option<u64>,
    seen: FxHashSet<Key>,
    records: usize,
    malformed: usize,
}

impl DedupStore {
    pub fn empty(mode: ResumeMode) -> Self {
        Self {
            mode,
            cursor: None,
            seen: FxHashSet::default(),
            records: 0,
            malformed: 0,
        }
    }

    /// Scan an append log. A missing file yields an empty store.
    ///
    /// Lines that don't parse (a record cut off by a crash, stray garbage)
    /// are counted and skipped.
    pub fn load(path: &Path, mode: ResumeMode) -> io::Result<Self> {
        let mut store = Self::empty(mode);
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(store),
            Err(e) => return Err(e),
        };

        let mut reader = BufReader::new(file);
        let mut line = Vec::with_capacity(4096);
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<KeyOnly>(&line) {
                Ok(entry) => {
                    store.records += 1;
                    store.remember(entry.key);
                }
                Err(e) => {
                    store.malformed += 1;
                    log::debug!("{}: skipping malformed line: {e}", path.display());
                }
            }
        }

        if store.malformed > 0 {
            log::warn!(
                "{}: skipped {} malformed line(s)",
                path.display(),
                store.malformed
            );
        }
        log::debug!(
            "{}: {} records, cursor {:?}, {} keys in set",
            path.display(),
            store.records,
            store.cursor,
            store.seen.len()
        );
        Ok(store)
    }

    fn remember(&mut self, key: Key) {
        match (self.mode, key.as_numeric()) {
            (ResumeMode::Cursor, Some(n)) => {
                self.cursor = Some(self.cursor.map_or(n, |c| c.max(n)));
            }
            _ => {
                self.seen.insert(key);
            }
        }
    }

    /// Whether `key` has a persisted record.
    pub fn contains(&self, key: &Key) -> bool {
        if let (ResumeMode::Cursor, Some(n), Some(cursor)) = (self.mode, key.as_numeric(), self.cursor)
        {
            if n <= cursor {
                return true;
            }
        }
        self.seen.contains(key)
    }

    /// Record that `key` now has a persisted record.
    ///
    /// In cursor mode keys above the high-water mark go to the set so that
    /// non-monotonic appends within a run are still caught.
    pub fn insert(&mut self, key: Key) {
        self.records += 1;
        self.seen.insert(key);
    }

    /// Highest numeric key seen on load.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// First numeric key not covered by the cursor.
    pub fn next_numeric(&self) -> u64 {
        self.cursor.map_or(1, |c| c.saturating_add(1))
    }

    pub fn mode(&self) -> ResumeMode {
        self.mode
    }

    /// Number of complete records seen on load plus records inserted since.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn malformed_lines(&self) -> usize {
        self.malformed
    }

    /// Keys held explicitly (everything except cursor-covered numeric keys).
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.seen.iter()
    }
}
