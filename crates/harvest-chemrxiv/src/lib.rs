//! Harvest ChemRxiv - preprint metadata, PDF and paragraph harvesting
//!
//! Three stages:
//!
//! - `gather` walks the public listing page by page, logs every new preprint
//!   and keeps a metadata CSV in step with the log.
//! - `download` reads the gather log and fetches each preprint's PDF.
//! - `parse` turns GROBID TEI output for those PDFs into cleaned, filtered
//!   paragraphs.

pub mod api;
pub mod config;
pub mod download;
pub mod paragraphs;
pub mod runner;
pub mod tei;
pub mod transform;
pub mod unigram;

// Re-exports
pub use api::{ChemRxivApi, Page, PageApi, Preprint, PreprintSource};
pub use config::{DownloadConfig, GatherConfig, ParseConfig};
pub use download::{PdfDownloader, PdfJob};
pub use paragraphs::{ParagraphExtractor, ParagraphFilter, ParagraphProjection, TeiJob};
pub use runner::{
    ParseReport, download, download_with, gather, gather_with, materialize_metadata, parse,
};
pub use transform::{MetadataProjection, safe_filename};
pub use unigram::UnigramModel;
