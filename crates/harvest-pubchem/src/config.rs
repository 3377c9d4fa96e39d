//! PubChem pipeline configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use harvest_core::{HttpSettings, Pacing};

/// Name of the append log inside the output directory.
pub const LOG_FILE: &str = "compounds.jsonl";

/// Runtime configuration for the download stage
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Directory holding the compound log
    pub output_dir: PathBuf,
    /// Highest CID to request when walking the range
    pub max_cid: u64,
    /// JSON array of CIDs to fetch instead of the range
    pub predefined_cids: Option<PathBuf>,
    /// PUG-View service root
    pub base_url: String,
    pub pacing: Pacing,
    pub http: HttpSettings,
    /// fsync the log after every record
    pub sync: bool,
}

impl DownloadConfig {
    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(LOG_FILE)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("pubchem"),
            max_cid: 1000,
            predefined_cids: None,
            base_url: "https://pubchem.ncbi.nlm.nih.gov/rest/pug_view".to_string(),
            pacing: Pacing {
                request_delay: Duration::from_secs(3),
                batch_size: 1000,
                batch_delay: Duration::from_secs(120),
                ..Pacing::default()
            },
            http: HttpSettings {
                request_timeout: Duration::from_secs(10),
                ..HttpSettings::default()
            },
            sync: false,
        }
    }
}

/// Runtime configuration for the parse stage
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Compound log written by the download stage
    pub log_path: PathBuf,
    pub compounds_csv: PathBuf,
    pub descriptions_csv: PathBuf,
}

impl ParseConfig {
    /// Tables next to the log, with their usual names.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            log_path: dir.join(LOG_FILE),
            compounds_csv: dir.join("compounds.csv"),
            descriptions_csv: dir.join("descriptions.csv"),
        }
    }
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self::in_dir(Path::new("pubchem"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_download_config() {
        let config = DownloadConfig::default();
        assert_eq!(config.log_path(), PathBuf::from("pubchem/compounds.jsonl"));
        assert_eq!(config.pacing.request_delay, Duration::from_secs(3));
        assert_eq!(config.pacing.batch_size, 1000);
        assert!(config.predefined_cids.is_none());
        assert!(config.base_url.starts_with("https://"));
    }

    #[test]
    fn parse_config_in_dir() {
        let config = ParseConfig::in_dir(Path::new("/data"));
        assert_eq!(config.log_path, PathBuf::from("/data/compounds.jsonl"));
        assert_eq!(config.descriptions_csv, PathBuf::from("/data/descriptions.csv"));
    }
}
