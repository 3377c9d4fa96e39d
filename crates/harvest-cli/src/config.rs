//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use harvest_core::{CooldownPolicy, HttpSettings, MissingKeys, Pacing, RetryPolicy, SampleSize};
use harvest_querygen::{LlmConfig, QueryGenConfig, ResponseMode};
use serde::Deserialize;

/// Global configuration for harvest
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pubchem: PubChemConfig,
    pub chemrxiv: ChemRxivConfig,
    pub querygen: QueryGenSection,
}

/// Pacing options shared by every pipeline. `request_delay_secs` falls back
/// to the pipeline's own default when unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub batch_size: u64,
    pub batch_delay_secs: f64,
    pub cooldown_secs: f64,
    pub request_delay_secs: Option<f64>,
    /// Unbounded when unset
    pub max_cooldowns: Option<u32>,
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            batch_delay_secs: 120.0,
            cooldown_secs: 120.0,
            request_delay_secs: None,
            max_cooldowns: None,
            max_attempts: 5,
            base_delay_secs: 2.0,
            max_delay_secs: 64.0,
        }
    }
}

fn secs(v: f64) -> Duration {
    Duration::try_from_secs_f64(v).unwrap_or(Duration::ZERO)
}

impl PacingConfig {
    pub fn to_pacing(&self, default_request_delay: f64) -> Pacing {
        Pacing {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: secs(self.base_delay_secs),
                max_delay: secs(self.max_delay_secs),
            },
            request_delay: secs(self.request_delay_secs.unwrap_or(default_request_delay)),
            batch_size: self.batch_size,
            batch_delay: secs(self.batch_delay_secs),
            cooldown: CooldownPolicy {
                duration: secs(self.cooldown_secs),
                max_rounds: self.max_cooldowns,
            },
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.batch_size == 0 {
            bail!("[{section}.pacing] batch_size must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("[{section}.pacing] max_attempts must be at least 1");
        }
        let durations = [
            ("batch_delay_secs", Some(self.batch_delay_secs)),
            ("cooldown_secs", Some(self.cooldown_secs)),
            ("request_delay_secs", self.request_delay_secs),
            ("base_delay_secs", Some(self.base_delay_secs)),
            ("max_delay_secs", Some(self.max_delay_secs)),
        ];
        for (name, value) in durations {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    bail!("[{section}.pacing] {name} must be a non-negative number, got {v}");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubChemConfig {
    pub output_dir: PathBuf,
    pub max_cid: u64,
    /// JSON array of CIDs to fetch instead of the range
    pub predefined_cids: Option<PathBuf>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub sync: bool,
    pub pacing: PacingConfig,
}

impl Default for PubChemConfig {
    fn default() -> Self {
        let defaults = harvest_pubchem::DownloadConfig::default();
        Self {
            output_dir: defaults.output_dir,
            max_cid: defaults.max_cid,
            predefined_cids: None,
            base_url: defaults.base_url,
            timeout_secs: defaults.http.request_timeout.as_secs(),
            sync: false,
            pacing: PacingConfig::default(),
        }
    }
}

impl PubChemConfig {
    pub fn download(&self) -> harvest_pubchem::DownloadConfig {
        harvest_pubchem::DownloadConfig {
            output_dir: self.output_dir.clone(),
            max_cid: self.max_cid,
            predefined_cids: self.predefined_cids.clone(),
            base_url: self.base_url.clone(),
            pacing: self.pacing.to_pacing(3.0),
            http: http_settings(self.timeout_secs),
            sync: self.sync,
        }
    }

    pub fn parse(&self) -> harvest_pubchem::ParseConfig {
        harvest_pubchem::ParseConfig::in_dir(&self.output_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChemRxivConfig {
    /// Holds the metadata log and CSV, and `papers/`
    pub output_dir: PathBuf,
    pub base_url: String,
    pub page_size: u64,
    pub timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub pacing: PacingConfig,
    pub paragraphs: ParagraphSection,
}

/// `[chemrxiv.paragraphs]`: GROBID TEI → paragraphs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParagraphSection {
    /// GROBID output directory (default: `<output_dir>/tei`)
    pub tei_dir: Option<PathBuf>,
    pub concat_per_div: bool,
    pub min_words: usize,
    /// `word,count` table; omit to skip the log-probability filter
    pub unigram_counts: Option<PathBuf>,
    pub min_log_prob: f64,
}

impl Default for ParagraphSection {
    fn default() -> Self {
        let parse = harvest_chemrxiv::ParseConfig::default();
        Self {
            tei_dir: None,
            concat_per_div: parse.concat_per_div,
            min_words: parse.min_words,
            unigram_counts: None,
            min_log_prob: parse.min_log_prob,
        }
    }
}

impl Default for ChemRxivConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("chemrxiv"),
            base_url: harvest_chemrxiv::config::DEFAULT_BASE_URL.to_string(),
            page_size: 50,
            timeout_secs: 30,
            download_timeout_secs: 60,
            pacing: PacingConfig::default(),
            paragraphs: ParagraphSection::default(),
        }
    }
}

impl ChemRxivConfig {
    fn metadata_log(&self) -> PathBuf {
        self.output_dir.join("chemrxiv_metadata.jsonl")
    }

    pub fn gather(&self) -> harvest_chemrxiv::GatherConfig {
        harvest_chemrxiv::GatherConfig {
            log_path: self.metadata_log(),
            csv_path: self.output_dir.join("chemrxiv_metadata.csv"),
            base_url: self.base_url.clone(),
            page_size: self.page_size,
            pacing: self.pacing.to_pacing(1.0),
            http: http_settings(self.timeout_secs),
        }
    }

    pub fn download(&self) -> harvest_chemrxiv::DownloadConfig {
        harvest_chemrxiv::DownloadConfig {
            metadata_log: self.metadata_log(),
            download_dir: self.output_dir.join("papers"),
            pacing: self.pacing.to_pacing(1.0),
            http: http_settings(self.download_timeout_secs),
        }
    }

    pub fn parse(&self) -> harvest_chemrxiv::ParseConfig {
        let section = &self.paragraphs;
        harvest_chemrxiv::ParseConfig {
            tei_dir: section
                .tei_dir
                .clone()
                .unwrap_or_else(|| self.output_dir.join("tei")),
            paragraph_dir: self.output_dir.join("paragraphs"),
            csv_path: self.output_dir.join("chemrxiv_paragraphs.csv"),
            concat_per_div: section.concat_per_div,
            min_words: section.min_words,
            unigram_counts: section.unigram_counts.clone(),
            min_log_prob: section.min_log_prob,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseModeSetting {
    #[default]
    Structured,
    FreeText,
}

impl From<ResponseModeSetting> for ResponseMode {
    fn from(m: ResponseModeSetting) -> Self {
        match m {
            ResponseModeSetting::Structured => ResponseMode::Structured,
            ResponseModeSetting::FreeText => ResponseMode::FreeText,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    pub model: String,
    pub max_completion_tokens: u32,
    pub temperature: f32,
    pub is_reasoning: bool,
    pub response_mode: ResponseModeSetting,
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        let defaults = LlmConfig::default();
        Self {
            base_url: defaults.base_url,
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: defaults.model,
            max_completion_tokens: defaults.max_completion_tokens,
            temperature: defaults.temperature,
            is_reasoning: false,
            response_mode: ResponseModeSetting::Structured,
            timeout_secs: defaults.http.request_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryGenSection {
    pub data_path: PathBuf,
    pub root_dir: PathBuf,
    pub text_column: String,
    pub id_columns: Vec<String>,
    pub prompt_template: String,
    pub workers: usize,
    pub sample_size: Option<usize>,
    pub sample_frac: Option<f64>,
    pub random_seed: Option<u64>,
    pub sample_ids_file: String,
    /// Abort when persisted sample keys are gone from the dataset
    pub strict_sample: bool,
    pub pacing: PacingConfig,
    pub llm: LlmSection,
}

impl Default for QueryGenSection {
    fn default() -> Self {
        let defaults = QueryGenConfig::default();
        Self {
            data_path: defaults.data_path,
            root_dir: defaults.root_dir,
            text_column: defaults.text_column,
            id_columns: defaults.id_columns,
            prompt_template: defaults.prompt_template,
            workers: defaults.workers,
            sample_size: None,
            sample_frac: None,
            random_seed: defaults.random_seed,
            sample_ids_file: defaults.sample_ids_file,
            strict_sample: false,
            pacing: PacingConfig::default(),
            llm: LlmSection::default(),
        }
    }
}

impl QueryGenSection {
    pub fn sample(&self) -> Option<SampleSize> {
        match (self.sample_size, self.sample_frac) {
            (Some(n), _) => Some(SampleSize::Count(n)),
            (None, Some(f)) => Some(SampleSize::Fraction(f)),
            (None, None) => None,
        }
    }

    pub fn to_config(&self) -> QueryGenConfig {
        let llm = LlmConfig {
            base_url: self.llm.base_url.clone(),
            api_key: self.llm.api_key.clone(),
            model: self.llm.model.clone(),
            max_completion_tokens: self.llm.max_completion_tokens,
            temperature: self.llm.temperature,
            is_reasoning: self.llm.is_reasoning,
            response_mode: self.llm.response_mode.into(),
            http: HttpSettings {
                request_timeout: Duration::from_secs(self.llm.timeout_secs),
                ..LlmConfig::default().http
            },
        };
        QueryGenConfig {
            data_path: self.data_path.clone(),
            root_dir: self.root_dir.clone(),
            text_column: self.text_column.clone(),
            id_columns: self.id_columns.clone(),
            prompt_template: self.prompt_template.clone(),
            workers: self.workers,
            sample: self.sample(),
            random_seed: self.random_seed,
            sample_ids_file: self.sample_ids_file.clone(),
            on_missing: if self.strict_sample {
                MissingKeys::Fail
            } else {
                MissingKeys::Drop
            },
            pacing: self.pacing.to_pacing(0.5),
            llm,
        }
    }
}

fn http_settings(timeout_secs: u64) -> HttpSettings {
    HttpSettings {
        request_timeout: Duration::from_secs(timeout_secs),
        ..HttpSettings::default()
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./harvest.toml (current directory)
    /// 2. ~/.config/harvest/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("harvest.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "harvest") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load and validate configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.pubchem.pacing.validate("pubchem")?;
        self.chemrxiv.pacing.validate("chemrxiv")?;
        self.querygen.pacing.validate("querygen")?;
        if self.chemrxiv.page_size == 0 {
            bail!("[chemrxiv] page_size must be at least 1");
        }

        let qg = &self.querygen;
        if qg.sample_size.is_some() && qg.sample_frac.is_some() {
            bail!("[querygen] sample_size and sample_frac are mutually exclusive");
        }
        qg.to_config().validate()?;
        Ok(())
    }
}
