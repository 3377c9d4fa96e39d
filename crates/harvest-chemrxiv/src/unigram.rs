//! Unigram log-probability filter for extracted paragraphs
//!
//! Scores a paragraph by the mean log2 probability of its words under a
//! word-frequency table (`word,count` lines, e.g. the Google Web 1T
//! unigram counts). Garbled extraction output (tables, formulas, broken
//! encodings) is dominated by unknown tokens and scores low.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct UnigramModel {
    log_p: FxHashMap<String, f64>,
    unknown: f64,
}

impl UnigramModel {
    pub fn load(path: &Path) -> io::Result<Self> {
        Self::from_counts(BufReader::new(File::open(path)?))
    }

    /// Parse `word,count` lines. Lines whose count isn't a plain number
    /// (the header, blanks) are skipped.
    pub fn from_counts(reader: impl BufRead) -> io::Result<Self> {
        let mut counts: FxHashMap<String, u64> = FxHashMap::default();
        for line in reader.lines() {
            let line = line?;
            let Some((word, count)) = line.trim().split_once(',') else {
                continue;
            };
            if let Ok(count) = count.parse::<u64>() {
                counts.insert(word.to_string(), count);
            }
        }

        let total: u64 = counts.values().sum();
        if total == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unigram table has no word counts",
            ));
        }
        let total_log = (total as f64).log2();
        // <unk> gets a fictional count of sqrt(vocabulary) + 1
        let unknown = ((counts.len() as f64).sqrt() + 1.0).log2() - total_log;
        let log_p = counts
            .into_iter()
            .map(|(word, count)| (word, (count as f64).log2() - total_log))
            .collect();
        Ok(Self { log_p, unknown })
    }

    pub fn log_p(&self, word: &str) -> f64 {
        self.log_p
            .get(&word.to_lowercase())
            .copied()
            .unwrap_or(self.unknown)
    }

    /// Mean log2 probability of the words of `text`; 0 for no words.
    pub fn score(&self, text: &str) -> f64 {
        let words = words(text);
        if words.is_empty() {
            return 0.0;
        }
        words.iter().map(|w| self.log_p(w)).sum::<f64>() / words.len() as f64
    }
}

/// Runs of letters, digits and apostrophes; any other non-space character
/// is a token of its own.
fn words(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for chunk in text.split_whitespace() {
        let mut start = None;
        for (i, c) in chunk.char_indices() {
            if c.is_alphanumeric() || c == '\'' {
                start.get_or_insert(i);
            } else {
                if let Some(s) = start.take() {
                    out.push(&chunk[s..i]);
                }
                out.push(&chunk[i..i + c.len_utf8()]);
            }
        }
        if let Some(s) = start {
            out.push(&chunk[s..]);
        }
    }
    out
}
