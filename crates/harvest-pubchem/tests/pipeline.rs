//! Download → parse over a stub PUG-View client

use std::sync::Arc;

use harvest_core::{Fetch, FetchError, Fetched, Pacing, ProgressContext, StopSignal};
use harvest_pubchem::{Cid, DownloadConfig, ParseConfig, download_with, parse};
use serde_json::{Value, json};
use tempfile::TempDir;

/// Serves a minimal record for every CID except the ones marked missing.
struct StubPubChem {
    missing: Vec<u64>,
    requested: Vec<u64>,
}

fn record(cid: u64) -> Value {
    json!({
        "Record": {
            "RecordNumber": cid,
            "RecordTitle": format!("Compound {cid}"),
            "Section": [{
                "TOCHeading": "Names and Identifiers",
                "Section": [
                    {"TOCHeading": "Molecular Formula",
                     "Information": [{"Value": {"StringWithMarkup": [{"String": "CH4"}]}}]}
                ]
            }]
        }
    })
}

impl Fetch for StubPubChem {
    type Item = Cid;

    fn fetch(&mut self, cid: &Cid) -> Result<Fetched, FetchError> {
        self.requested.push(cid.0);
        if self.missing.contains(&cid.0) {
            return Err(FetchError::Permanent("HTTP 404: Not Found".into()));
        }
        Ok(Fetched::new(record(cid.0)))
    }
}

fn config(dir: &TempDir, max_cid: u64) -> DownloadConfig {
    DownloadConfig {
        output_dir: dir.path().to_path_buf(),
        max_cid,
        pacing: Pacing::immediate(),
        ..Default::default()
    }
}

fn stub() -> StubPubChem {
    StubPubChem {
        missing: vec![3],
        requested: Vec::new(),
    }
}

fn progress() -> harvest_core::SharedProgress {
    Arc::new(ProgressContext::hidden())
}

#[test]
fn download_resumes_from_cursor_then_parses() {
    let dir = TempDir::new().unwrap();

    let first = download_with(&config(&dir, 5), stub(), StopSignal::new(), progress()).unwrap();
    assert_eq!(first.succeeded, 4);
    assert_eq!(first.failed, 1);

    // Extending the range only requests the new CIDs
    let second = download_with(&config(&dir, 7), stub(), StopSignal::new(), progress()).unwrap();
    assert_eq!(second.total, 2);
    assert_eq!(second.succeeded, 2);

    let stats = parse(&ParseConfig::in_dir(dir.path())).unwrap();
    assert_eq!(stats.records, 7);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.rows, vec![6, 0]);

    let compounds = std::fs::read_to_string(dir.path().join("compounds.csv")).unwrap();
    let mut lines = compounds.lines();
    assert_eq!(
        lines.next(),
        Some("CID,Title,MolecularFormula,IUPACName,InChI,SMILES,Synonyms")
    );
    assert_eq!(lines.next(), Some("1,Compound 1,CH4,,,,[]"));
    assert!(!compounds.contains("Compound 3"));

    let descriptions = std::fs::read_to_string(dir.path().join("descriptions.csv")).unwrap();
    assert_eq!(descriptions.lines().count(), 1);
}

#[test]
fn predefined_list_skips_done_cids() {
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("cids.json");
    std::fs::write(&list, "[10, 4, 10, 8]").unwrap();

    let mut cfg = config(&dir, 0);
    cfg.predefined_cids = Some(list);
    let summary = download_with(&cfg, stub(), StopSignal::new(), progress()).unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.skipped, 1);

    let again = download_with(&cfg, stub(), StopSignal::new(), progress()).unwrap();
    assert_eq!(again.attempted, 0);
    assert_eq!(again.skipped, 4);
}
