//! Projecting the append log into CSV tables
//!
//! Two ways in: [`Materializer`] rebuilds every table from the whole log
//! (tmp file, then rename), and [`IncrementalMaterializer`] appends rows as
//! records land during a run, flushing every K successes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use crate::append_log::LogRecords;
use crate::engine::RecordObserver;
use crate::error::HarvestError;
use crate::record::{Key, ProcessedRecord};

/// One output table: file stem and column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableSpec {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// One row destined for table number `table`. `None` cells are written empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub table: usize,
    pub cells: Vec<Option<String>>,
}

/// Record → rows. Must not fail on missing optional fields.
pub trait Projection {
    fn tables(&self) -> Vec<TableSpec>;

    fn project(&self, record: &ProcessedRecord) -> Vec<TableRow>;
}

fn write_cells(writer: &mut csv::Writer<File>, width: usize, cells: &[Option<String>]) -> io::Result<()> {
    let row = (0..width).map(|i| cells.get(i).and_then(Option::as_deref).unwrap_or(""));
    writer.write_record(row)?;
    Ok(())
}

/// CSV table opened for appending. The header is written only when the file
/// is new or empty.
pub struct TableWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
    width: usize,
    rows: usize,
}

impl std::fmt::Debug for TableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableWriter")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl TableWriter {
    pub fn append(path: &Path, columns: &[String]) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_empty = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new().from_writer(file);
        if is_empty {
            writer.write_record(columns)?;
            writer.flush()?;
        }
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            width: columns.len(),
            rows: 0,
        })
    }

    pub fn write_row(&mut self, cells: &[Option<String>]) -> io::Result<()> {
        write_cells(&mut self.writer, self.width, cells)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Rows written through this handle.
    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Fresh CSV table with atomic tmp→rename on finalize.
struct CsvSink {
    writer: csv::Writer<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    width: usize,
    rows: usize,
}

impl CsvSink {
    fn new(path: &Path, columns: &[String]) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        let tmp_path = path.with_file_name(name);

        let mut writer = csv::WriterBuilder::new().from_writer(File::create(&tmp_path)?);
        writer.write_record(columns)?;
        Ok(Self {
            writer,
            tmp_path,
            final_path: path.to_path_buf(),
            width: columns.len(),
            rows: 0,
        })
    }

    fn write_row(&mut self, cells: &[Option<String>]) -> io::Result<()> {
        write_cells(&mut self.writer, self.width, cells)?;
        self.rows += 1;
        Ok(())
    }

    fn finalize(mut self) -> io::Result<usize> {
        self.writer.flush()?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(self.rows)
    }
}

/// Counts from one full materialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeStats {
    pub records: usize,
    pub failures: usize,
    /// Later records for an already-seen key (ignored).
    pub duplicates: usize,
    pub malformed: usize,
    /// Rows written per table, in table order.
    pub rows: Vec<usize>,
}

/// Rebuilds output tables from the whole append log.
pub struct Materializer<P> {
    projection: P,
    tables: Vec<TableSpec>,
    outputs: Vec<PathBuf>,
}

impl<P: Projection> Materializer<P> {
    /// `outputs[i]` receives table `i` of the projection.
    pub fn new(projection: P, outputs: Vec<PathBuf>) -> Result<Self, HarvestError> {
        let tables = projection.tables();
        if tables.len() != outputs.len() {
            return Err(HarvestError::Config(format!(
                "projection has {} tables but {} output paths were given",
                tables.len(),
                outputs.len()
            )));
        }
        Ok(Self {
            projection,
            tables,
            outputs,
        })
    }

    /// Stream the log once and replace every output table.
    ///
    /// The first record for a key wins. A missing log yields header-only tables.
    pub fn materialize(&self, log_path: &Path) -> Result<MaterializeStats, HarvestError> {
        let mut sinks = self
            .tables
            .iter()
            .zip(&self.outputs)
            .map(|(spec, path)| CsvSink::new(path, &spec.columns))
            .collect::<io::Result<Vec<_>>>()?;

        let mut stats = MaterializeStats::default();
        match LogRecords::open(log_path) {
            Ok(mut records) => {
                let mut seen: FxHashSet<Key> = FxHashSet::default();
                for record in records.by_ref() {
                    let record = record?;
                    if !seen.insert(record.key.clone()) {
                        stats.duplicates += 1;
                        continue;
                    }
                    stats.records += 1;
                    if record.is_failure() {
                        stats.failures += 1;
                    }
                    for row in self.projection.project(&record) {
                        match sinks.get_mut(row.table) {
                            Some(sink) => sink.write_row(&row.cells)?,
                            None => log::warn!("{}: row for unknown table {}", record.key, row.table),
                        }
                    }
                }
                stats.malformed = records.malformed();
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("{}: no log yet, writing empty tables", log_path.display());
            }
            Err(e) => return Err(e.into()),
        }

        for (sink, spec) in sinks.into_iter().zip(&self.tables) {
            let rows = sink.finalize()?;
            log::info!("{}: {rows} rows", spec.name);
            stats.rows.push(rows);
        }
        Ok(stats)
    }
}

/// Appends projected rows while a run is going.
///
/// Only records appended in this run pass through, so a table written this
/// way never repeats a key the log already had.
pub struct IncrementalMaterializer<P> {
    projection: P,
    writers: Vec<TableWriter>,
    flush_every: u64,
    successes: u64,
}

impl<P: Projection> IncrementalMaterializer<P> {
    /// `flush_every == 0` flushes only when the run ends.
    pub fn open(projection: P, outputs: &[PathBuf], flush_every: u64) -> Result<Self, HarvestError> {
        let tables = projection.tables();
        if tables.len() != outputs.len() {
            return Err(HarvestError::Config(format!(
                "projection has {} tables but {} output paths were given",
                tables.len(),
                outputs.len()
            )));
        }
        let writers = tables
            .iter()
            .zip(outputs)
            .map(|(spec, path)| TableWriter::append(path, &spec.columns))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            projection,
            writers,
            flush_every,
            successes: 0,
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        for w in &mut self.writers {
            w.flush()?;
        }
        Ok(())
    }

    pub fn rows(&self) -> Vec<usize> {
        self.writers.iter().map(TableWriter::rows).collect()
    }
}

impl<P: Projection> RecordObserver for IncrementalMaterializer<P> {
    fn on_append(&mut self, record: &ProcessedRecord) -> Result<(), HarvestError> {
        for row in self.projection.project(record) {
            if let Some(w) = self.writers.get_mut(row.table) {
                w.write_row(&row.cells)?;
            }
        }
        if !record.is_failure() {
            self.successes += 1;
            if self.flush_every > 0 && self.successes % self.flush_every == 0 {
                self.flush()?;
                log::debug!("flushed tables after {} successes", self.successes);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), HarvestError> {
        self.flush()?;
        Ok(())
    }
}

/// Remove stale .tmp files left by an interrupted materialization or download.
pub fn cleanup_tmp_files(dir: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
