//! Query generation configuration

use std::path::PathBuf;
use std::time::Duration;

use harvest_core::{HarvestError, HttpSettings, MissingKeys, Pacing, SampleSize, Sampler};

/// Append log inside the root directory.
pub const CACHE_FILE: &str = "cache_result.jsonl";
/// Final table inside the root directory.
pub const RESULTS_FILE: &str = "results.csv";

/// How the model is asked to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Request JSON output and parse the message content directly.
    #[default]
    Structured,
    /// Plain completion; strip a `<think>` block, then parse the first `{...}`.
    FreeText,
}

/// Chat-completions endpoint and sampling settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_completion_tokens: u32,
    pub temperature: f32,
    /// Reasoning models get a forced temperature (and a thinking budget on
    /// models that take one).
    pub is_reasoning: bool,
    pub response_mode: ResponseMode,
    pub http: HttpSettings,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_completion_tokens: 1024,
            temperature: 0.0,
            is_reasoning: false,
            response_mode: ResponseMode::Structured,
            http: HttpSettings {
                connect_timeout: Duration::from_secs(300),
                request_timeout: Duration::from_secs(1000),
                ..HttpSettings::default()
            },
        }
    }
}

/// Runtime configuration for one generation job
#[derive(Debug, Clone)]
pub struct QueryGenConfig {
    /// CSV file with a header row
    pub data_path: PathBuf,
    /// Job directory: cache log, sampled keys and results live here
    pub root_dir: PathBuf,
    pub text_column: String,
    /// Columns that together identify a row
    pub id_columns: Vec<String>,
    /// Prompt with a `{text}` placeholder
    pub prompt_template: String,
    pub workers: usize,
    /// `None` processes every row
    pub sample: Option<SampleSize>,
    /// Sampling only happens with a seed, as before
    pub random_seed: Option<u64>,
    /// File name (in `root_dir`) of the persisted sample keys
    pub sample_ids_file: String,
    pub on_missing: MissingKeys,
    pub pacing: Pacing,
    pub llm: LlmConfig,
}

impl QueryGenConfig {
    pub fn cache_path(&self) -> PathBuf {
        self.root_dir.join(CACHE_FILE)
    }

    pub fn results_path(&self) -> PathBuf {
        self.root_dir.join(RESULTS_FILE)
    }

    pub fn sample_path(&self) -> PathBuf {
        self.root_dir.join(&self.sample_ids_file)
    }

    /// Reject settings that would make the run meaningless.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.id_columns.is_empty() {
            return Err(HarvestError::Config("id_columns must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(HarvestError::Config("workers must be at least 1".into()));
        }
        match self.sample {
            Some(SampleSize::Count(0)) => {
                return Err(HarvestError::Config("sample_size must be at least 1".into()));
            }
            Some(SampleSize::Fraction(f)) if !(f > 0.0 && f <= 1.0) => {
                return Err(HarvestError::Config(format!(
                    "sample_frac must be in (0, 1], got {f}"
                )));
            }
            _ => {}
        }
        if !self.prompt_template.contains("{text}") {
            log::warn!("prompt template has no {{text}} placeholder");
        }
        Ok(())
    }

    /// Sampling applies only with both a size and a seed.
    pub fn sampler(&self) -> Option<Sampler> {
        Some(Sampler {
            seed: self.random_seed?,
            size: self.sample?,
            keys_path: self.sample_path(),
            on_missing: self.on_missing,
        })
    }
}

impl Default for QueryGenConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data.csv"),
            root_dir: PathBuf::from("querygen"),
            text_column: "text".to_string(),
            id_columns: vec!["id".to_string()],
            prompt_template: "Write one question answered by this paragraph. \
                Reply as JSON {\"question\": \"...\"}.\n\n{text}"
                .to_string(),
            workers: 4,
            sample: None,
            random_seed: Some(42),
            sample_ids_file: "sampled_ids.json".to_string(),
            on_missing: MissingKeys::Drop,
            pacing: Pacing {
                request_delay: Duration::from_millis(500),
                batch_size: 0,
                ..Pacing::default()
            },
            llm: LlmConfig::default(),
        }
    }
}
