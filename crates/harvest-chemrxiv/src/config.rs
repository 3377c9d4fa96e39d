//! ChemRxiv pipeline configuration

use std::path::PathBuf;
use std::time::Duration;

use harvest_core::{HttpSettings, Pacing};

/// Public API root.
pub const DEFAULT_BASE_URL: &str = "https://chemrxiv.org/engage/chemrxiv/public-api/v1";

fn chemrxiv_pacing() -> Pacing {
    Pacing {
        request_delay: Duration::from_secs(1),
        batch_size: 1000,
        batch_delay: Duration::from_secs(120),
        ..Pacing::default()
    }
}

/// Runtime configuration for the metadata gather stage
#[derive(Debug, Clone)]
pub struct GatherConfig {
    /// Append log of raw listing hits
    pub log_path: PathBuf,
    /// Metadata table, appended as hits arrive
    pub csv_path: PathBuf,
    pub base_url: String,
    /// Listing page size (`limit`)
    pub page_size: u64,
    pub pacing: Pacing,
    pub http: HttpSettings,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("chemrxiv/chemrxiv_metadata.jsonl"),
            csv_path: PathBuf::from("chemrxiv/chemrxiv_metadata.csv"),
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 50,
            pacing: chemrxiv_pacing(),
            http: HttpSettings {
                request_timeout: Duration::from_secs(30),
                ..HttpSettings::default()
            },
        }
    }
}

/// Runtime configuration for the PDF download stage
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Log written by the gather stage
    pub metadata_log: PathBuf,
    pub download_dir: PathBuf,
    pub pacing: Pacing,
    pub http: HttpSettings,
}

impl DownloadConfig {
    /// Download records live next to the PDFs.
    pub fn log_path(&self) -> PathBuf {
        self.download_dir.join("downloads.jsonl")
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            metadata_log: PathBuf::from("chemrxiv/chemrxiv_metadata.jsonl"),
            download_dir: PathBuf::from("chemrxiv/papers"),
            pacing: chemrxiv_pacing(),
            http: HttpSettings {
                request_timeout: Duration::from_secs(60),
                ..HttpSettings::default()
            },
        }
    }
}

/// Runtime configuration for the TEI → paragraphs stage
///
/// Input is GROBID output (`*.xml`, one file per preprint). Filter settings
/// apply to files not yet in the paragraph log; delete the log to re-parse
/// everything with new settings.
#[derive(Debug, Clone)]
pub struct ParseConfig {
    pub tei_dir: PathBuf,
    /// Per-preprint `{id}-paragraphs.json` files and the paragraph log
    pub paragraph_dir: PathBuf,
    pub csv_path: PathBuf,
    /// Join the paragraphs of each `<div>` into one entry
    pub concat_per_div: bool,
    /// Keep paragraphs with more words than this
    pub min_words: usize,
    /// `word,count` table for the unigram filter; `None` skips the filter
    pub unigram_counts: Option<PathBuf>,
    pub min_log_prob: f64,
}

impl ParseConfig {
    pub fn log_path(&self) -> PathBuf {
        self.paragraph_dir.join("paragraphs.jsonl")
    }
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            tei_dir: PathBuf::from("chemrxiv/tei"),
            paragraph_dir: PathBuf::from("chemrxiv/paragraphs"),
            csv_path: PathBuf::from("chemrxiv/chemrxiv_paragraphs.csv"),
            concat_per_div: false,
            min_words: 50,
            unigram_counts: None,
            min_log_prob: -20.0,
        }
    }
}
