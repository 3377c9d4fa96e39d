//! Append-only JSONL log of processed records
//!
//! One record per line. Appends are serialized by a mutex held only for the
//! write itself, and each line goes out in a single `write_all` followed by a
//! flush, so a crash leaves at most the in-flight line incomplete.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::dedup::DedupStore;
use crate::error::HarvestError;
use crate::record::{Key, ProcessedRecord};

/// Result of one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Written,
    /// A record with this key already exists; nothing was written.
    Duplicate,
}

struct LogWriter {
    file: File,
    done: DedupStore,
    appended: usize,
}

/// Single logical writer of the append log, shareable across worker threads.
pub struct AppendLog {
    path: PathBuf,
    inner: Mutex<LogWriter>,
    sync: bool,
}

impl std::fmt::Debug for AppendLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendLog")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl AppendLog {
    /// Open (or create) the log at `path`, taking ownership of its resume state.
    ///
    /// If the file ends mid-line (a crash during a previous append), a newline
    /// is written first so the next record starts on its own line. The partial
    /// line stays in place and is skipped by readers.
    pub fn open(path: &Path, done: DedupStore) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                log::warn!(
                    "{}: last record is incomplete, starting a fresh line",
                    path.display()
                );
                file.write_all(b"\n")?;
                file.flush()?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(LogWriter {
                file,
                done,
                appended: 0,
            }),
            sync: false,
        })
    }

    /// Also `fsync` after every append (survives power loss, not just crashes).
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Append one record unless its key is already present.
    pub fn append(&self, record: &ProcessedRecord) -> Result<Append, HarvestError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut w = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if w.done.contains(&record.key) {
            log::debug!("{}: duplicate key {}, not appended", self.path.display(), record.key);
            return Ok(Append::Duplicate);
        }
        w.file.write_all(&line)?;
        w.file.flush()?;
        if self.sync {
            w.file.sync_data()?;
        }
        w.done.insert(record.key.clone());
        w.appended += 1;
        Ok(Append::Written)
    }

    /// Whether a record for `key` exists (persisted before this run or appended since).
    pub fn contains(&self, key: &Key) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .done
            .contains(key)
    }

    /// Records appended through this handle.
    pub fn appended(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .appended
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Stream complete records from a log, skipping lines that don't parse.
pub struct LogRecords {
    reader: BufReader<File>,
    line: Vec<u8>,
    malformed: usize,
}

impl LogRecords {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            line: Vec::with_capacity(4096),
            malformed: 0,
        })
    }

    /// Lines skipped so far.
    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

impl Iterator for LogRecords {
    type Item = io::Result<ProcessedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<ProcessedRecord>(&self.line) {
                Ok(record) => return Some(Ok(record)),
                Err(e) => {
                    self.malformed += 1;
                    log::debug!("skipping malformed log line: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::ResumeMode;
    use crate::error::FetchError;
    use crate::record::Fetched;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ok_record(key: u64) -> ProcessedRecord {
        ProcessedRecord::success(
            Key::Numeric(key),
            None,
            Fetched::new(json!({ "body": "x".repeat(2048) })),
            1,
        )
    }

    #[test]
    fn append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/log.jsonl");
        let log = AppendLog::open(&path, DedupStore::empty(ResumeMode::Cursor)).unwrap();
        assert_eq!(log.append(&ok_record(1)).unwrap(), Append::Written);
        let failed = ProcessedRecord::failure(
            Key::Numeric(2),
            None,
            &FetchError::Permanent("bad".into()),
            1,
        );
        assert_eq!(log.append(&failed).unwrap(), Append::Written);
        assert_eq!(log.appended(), 2);

        let records: Vec<_> = LogRecords::open(&path)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].is_failure());
    }

    #[test]
    fn duplicate_key_is_not_appended() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = AppendLog::open(&path, DedupStore::empty(ResumeMode::DedupSet)).unwrap();
        log.append(&ok_record(5)).unwrap();
        assert_eq!(log.append(&ok_record(5)).unwrap(), Append::Duplicate);
        assert_eq!(LogRecords::open(&path).unwrap().count(), 1);
    }

    #[test]
    fn keys_from_previous_runs_are_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        {
            let log = AppendLog::open(&path, DedupStore::empty(ResumeMode::Cursor)).unwrap();
            log.append(&ok_record(1)).unwrap();
            log.append(&ok_record(2)).unwrap();
        }
        let done = DedupStore::load(&path, ResumeMode::Cursor).unwrap();
        let log = AppendLog::open(&path, done).unwrap();
        assert!(log.contains(&Key::Numeric(2)));
        assert_eq!(log.append(&ok_record(1)).unwrap(), Append::Duplicate);
        assert_eq!(log.append(&ok_record(3)).unwrap(), Append::Written);
    }

    #[test]
    fn partial_trailing_line_is_terminated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let first = serde_json::to_string(&ok_record(1)).unwrap();
        fs::write(&path, format!("{first}\n{{\"key\":2,\"pay")).unwrap();

        let done = DedupStore::load(&path, ResumeMode::Cursor).unwrap();
        let log = AppendLog::open(&path, done).unwrap();
        log.append(&ok_record(2)).unwrap();

        let mut records = LogRecords::open(&path).unwrap();
        let keys: Vec<Key> = records.by_ref().map(|r| r.unwrap().key).collect();
        assert_eq!(keys, vec![Key::Numeric(1), Key::Numeric(2)]);
        assert_eq!(records.malformed(), 1);
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = Arc::new(AppendLog::open(&path, DedupStore::empty(ResumeMode::DedupSet)).unwrap());

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..50u64 {
                        log.append(&ok_record(t * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut records = LogRecords::open(&path).unwrap();
        let n = records.by_ref().map(|r| r.unwrap()).count();
        assert_eq!(n, 400);
        assert_eq!(records.malformed(), 0);
    }
}
