//! Compound IDs to fetch: a resumable range or a predefined list

use std::ops::RangeInclusive;
use std::path::Path;

use anyhow::{Context, Result};
use harvest_core::{FetchError, ItemSource, Key, ListSource, WorkItem};

/// PubChem compound identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cid(pub u64);

impl WorkItem for Cid {
    fn key(&self) -> Key {
        Key::Numeric(self.0)
    }
}

/// Either `next..=max` or an explicit list.
#[derive(Debug)]
pub enum CidSource {
    Range(RangeInclusive<u64>),
    List(ListSource<Cid>),
}

impl CidSource {
    /// Range continuing after the last CID already in the log.
    pub fn resume_range(next: u64, max: u64) -> Self {
        Self::Range(next..=max)
    }

    pub fn list(cids: Vec<u64>) -> Self {
        Self::List(ListSource::new(cids.into_iter().map(Cid)))
    }
}

impl ItemSource for CidSource {
    type Item = Cid;

    fn size_hint(&self) -> Option<u64> {
        match self {
            Self::Range(range) if range.is_empty() => Some(0),
            Self::Range(range) => Some((range.end() - range.start()).saturating_add(1)),
            Self::List(list) => list.size_hint(),
        }
    }

    fn next_item(&mut self) -> Result<Option<Cid>, FetchError> {
        match self {
            Self::Range(range) => Ok(range.next().map(Cid)),
            Self::List(list) => list.next_item(),
        }
    }
}

/// Read a JSON array of integer CIDs.
pub fn load_predefined_cids(path: &Path) -> Result<Vec<u64>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read predefined CIDs from {}", path.display()))?;
    let cids: Vec<u64> = serde_json::from_slice(&bytes).with_context(|| {
        format!(
            "{}: predefined CIDs must be a JSON list of integers",
            path.display()
        )
    })?;
    Ok(cids)
}
