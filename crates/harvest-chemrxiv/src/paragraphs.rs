//! TEI files → filtered paragraphs → paragraph table

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use harvest_core::{
    Fetch, FetchError, Fetched, Key, ProcessedRecord, Projection, TableRow, TableSpec, WorkItem,
};
use serde_json::{Value, json};

use crate::tei::{clean_paragraph, extract_paragraphs, preprint_id};
use crate::unigram::UnigramModel;

pub const PARAGRAPH_COLUMNS: &[&str] = &["id", "idx", "paragraph"];

/// One GROBID output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeiJob {
    pub id: String,
    pub path: PathBuf,
}

impl WorkItem for TeiJob {
    fn key(&self) -> Key {
        Key::Text(self.id.clone())
    }
}

/// Every `*.xml` file in `dir`, sorted by file name.
pub fn tei_jobs(dir: &Path) -> io::Result<Vec<TeiJob>> {
    let mut jobs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !path.extension().is_some_and(|e| e == "xml") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            log::warn!("Skipping non-UTF-8 file name {}", path.display());
            continue;
        };
        jobs.push(TeiJob {
            id: preprint_id(name).to_string(),
            path,
        });
    }
    jobs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(jobs)
}

/// Which paragraphs survive cleaning.
#[derive(Debug)]
pub struct ParagraphFilter {
    /// Keep paragraphs with more words than this.
    pub min_words: usize,
    /// Keep paragraphs whose mean unigram log2 probability is above
    /// `min_log_prob`. No model, no check.
    pub unigram: Option<UnigramModel>,
    pub min_log_prob: f64,
}

impl ParagraphFilter {
    pub fn keeps(&self, paragraph: &str) -> bool {
        if paragraph.split_whitespace().count() <= self.min_words {
            return false;
        }
        self.unigram
            .as_ref()
            .map_or(true, |m| m.score(paragraph) > self.min_log_prob)
    }
}

/// Parses one TEI file per item and writes `{id}-paragraphs.json` next to
/// the paragraph log.
pub struct ParagraphExtractor {
    pub json_dir: PathBuf,
    pub concat_per_div: bool,
    pub filter: ParagraphFilter,
}

impl ParagraphExtractor {
    pub fn json_path(&self, id: &str) -> PathBuf {
        self.json_dir.join(format!("{id}-paragraphs.json"))
    }
}

impl Fetch for ParagraphExtractor {
    type Item = TeiJob;

    fn fetch(&mut self, job: &TeiJob) -> Result<Fetched, FetchError> {
        let xml = fs::read_to_string(&job.path)
            .map_err(|e| FetchError::Permanent(format!("{}: {e}", job.path.display())))?;
        let raw = extract_paragraphs(&xml, self.concat_per_div)
            .map_err(|e| FetchError::Permanent(format!("{}: {e:#}", job.path.display())))?;

        let found = raw.len();
        let kept: Vec<String> = raw
            .iter()
            .map(|p| clean_paragraph(p))
            .filter(|p| self.filter.keeps(p))
            .collect();
        log::debug!("{}: kept {} of {found} paragraphs", job.id, kept.len());

        let json = serde_json::to_vec_pretty(&kept).map_err(|e| FetchError::Fatal(e.to_string()))?;
        let path = self.json_path(&job.id);
        fs::write(&path, json)
            .map_err(|e| FetchError::Fatal(format!("IO: {}: {e}", path.display())))?;

        Ok(Fetched::new(json!({
            "file": job.path,
            "found": found,
            "paragraphs": kept,
        }))
        .with_bytes(xml.len() as u64))
    }
}

/// One row per kept paragraph, numbered from 0 within its preprint.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParagraphProjection;

impl Projection for ParagraphProjection {
    fn tables(&self) -> Vec<TableSpec> {
        vec![TableSpec::new("chemrxiv_paragraphs", PARAGRAPH_COLUMNS)]
    }

    fn project(&self, record: &ProcessedRecord) -> Vec<TableRow> {
        let Key::Text(id) = &record.key else {
            return Vec::new();
        };
        let Some(paragraphs) = record
            .payload
            .as_ref()
            .and_then(|p| p.get("paragraphs"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };
        paragraphs
            .iter()
            .filter_map(Value::as_str)
            .enumerate()
            .map(|(idx, text)| TableRow {
                table: 0,
                cells: vec![Some(id.clone()), Some(idx.to_string()), Some(text.to_string())],
            })
            .collect()
    }
}
