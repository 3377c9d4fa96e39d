//! PDF jobs derived from the gather log

use std::io;
use std::path::{Path, PathBuf};

use harvest_core::{
    Fetch, FetchError, Fetched, HttpClient, HttpSettings, Key, LogRecords, WorkItem,
};
use serde_json::json;

use crate::transform::{pdf_url, safe_filename};

/// Longest file name most filesystems accept.
const MAX_FILENAME: usize = 255;

/// One PDF to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfJob {
    pub id: String,
    pub url: String,
    pub path: PathBuf,
}

impl WorkItem for PdfJob {
    fn key(&self) -> Key {
        Key::Text(self.id.clone())
    }
}

/// Jobs to run, plus how many were dropped before the run.
#[derive(Debug, Default)]
pub struct JobList {
    pub jobs: Vec<PdfJob>,
    /// Successful gather records without a PDF link.
    pub without_url: usize,
    /// Target file already on disk.
    pub on_disk: usize,
}

/// Build download jobs from every successful record of the gather log.
pub fn jobs_from_log(metadata_log: &Path, download_dir: &Path) -> io::Result<JobList> {
    let mut list = JobList::default();
    let mut records = LogRecords::open(metadata_log)?;
    for record in records.by_ref() {
        let record = record?;
        let Key::Text(id) = &record.key else {
            continue;
        };
        let Some(url) = record
            .payload
            .as_ref()
            .and_then(|p| p.get("item"))
            .and_then(pdf_url)
        else {
            list.without_url += 1;
            continue;
        };
        let path = download_dir.join(safe_filename(&format!("{id}.pdf"), MAX_FILENAME));
        if path.exists() {
            list.on_disk += 1;
            continue;
        }
        list.jobs.push(PdfJob {
            id: id.clone(),
            url: url.to_string(),
            path,
        });
    }
    if records.malformed() > 0 {
        log::warn!(
            "{}: skipped {} malformed lines",
            metadata_log.display(),
            records.malformed()
        );
    }
    Ok(list)
}

/// Streams each PDF to its target path.
pub struct PdfDownloader {
    http: HttpClient,
}

impl PdfDownloader {
    pub fn new(settings: &HttpSettings) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::new(settings)?,
        })
    }
}

impl Fetch for PdfDownloader {
    type Item = PdfJob;

    fn fetch(&mut self, job: &PdfJob) -> Result<Fetched, FetchError> {
        let bytes = self.http.download(&job.url, &job.path)?;
        Ok(Fetched::new(json!({ "path": job.path, "url": job.url })).with_bytes(bytes))
    }
}
