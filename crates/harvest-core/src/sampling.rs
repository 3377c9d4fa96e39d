//! Seeded, persisted item sampling
//!
//! The first run draws a subset with a seeded RNG and writes the chosen keys
//! to disk. Later runs reuse that key list, so the subset stays the same even
//! if the item source grows or is reordered.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use rustc_hash::FxHashSet;

use crate::error::HarvestError;
use crate::record::{Key, WorkItem};

/// How many items to keep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleSize {
    Count(usize),
    /// Share of the source in (0, 1]; at least one item is kept.
    Fraction(f64),
}

impl SampleSize {
    /// Number of items to draw from a source of `n` items.
    pub fn resolve(self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        match self {
            Self::Count(k) => {
                if k > n {
                    log::warn!("sample size {k} exceeds {n} available items, taking all");
                }
                k.min(n)
            }
            Self::Fraction(f) => ((n as f64 * f).floor() as usize).clamp(1, n),
        }
    }
}

/// What to do when persisted keys are no longer in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingKeys {
    /// Warn and continue with the keys still present.
    #[default]
    Drop,
    /// Abort with [`HarvestError::SampleMismatch`].
    Fail,
}

#[derive(Debug, Clone)]
pub struct Sampler {
    pub seed: u64,
    pub size: SampleSize,
    /// Where the chosen keys are persisted.
    pub keys_path: PathBuf,
    pub on_missing: MissingKeys,
}

impl Sampler {
    /// Reduce `items` to the sampled subset, keeping source order.
    pub fn select<T: WorkItem>(&self, items: Vec<T>) -> Result<Vec<T>, HarvestError> {
        match load_keys(&self.keys_path)? {
            Some(keys) => self.reuse(items, keys),
            None => self.draw(items),
        }
    }

    fn reuse<T: WorkItem>(&self, items: Vec<T>, keys: Vec<Key>) -> Result<Vec<T>, HarvestError> {
        let wanted: FxHashSet<Key> = keys.into_iter().collect();
        let selected: Vec<T> = items
            .into_iter()
            .filter(|item| wanted.contains(&item.key()))
            .collect();

        let missing = wanted.len() - selected.len().min(wanted.len());
        if missing > 0 {
            match self.on_missing {
                MissingKeys::Drop => log::warn!(
                    "{}: {missing} sampled keys not found in the source, dropping them",
                    self.keys_path.display()
                ),
                MissingKeys::Fail => return Err(HarvestError::SampleMismatch { missing }),
            }
        }
        log::info!(
            "reusing {} sampled items from {}",
            selected.len(),
            self.keys_path.display()
        );
        Ok(selected)
    }

    fn draw<T: WorkItem>(&self, items: Vec<T>) -> Result<Vec<T>, HarvestError> {
        let n = items.len();
        let k = self.size.resolve(n);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut chosen = index::sample(&mut rng, n, k).into_vec();
        chosen.sort_unstable();

        let mut chosen = chosen.into_iter().peekable();
        let selected: Vec<T> = items
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| {
                if chosen.peek() == Some(&i) {
                    chosen.next();
                    Some(item)
                } else {
                    None
                }
            })
            .collect();

        let keys: Vec<Key> = selected.iter().map(WorkItem::key).collect();
        save_keys(&self.keys_path, &keys)?;
        log::info!(
            "sampled {k} of {n} items (seed {}), keys saved to {}",
            self.seed,
            self.keys_path.display()
        );
        Ok(selected)
    }
}

fn load_keys(path: &Path) -> Result<Option<Vec<Key>>, HarvestError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn save_keys(path: &Path, keys: &[Key]) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(keys)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
