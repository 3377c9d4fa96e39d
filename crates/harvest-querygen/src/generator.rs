//! Dataset → sampled rows → worker pool → cache log → results.csv

use anyhow::{Context, Result};
use harvest_core::{
    AppendLog, DedupStore, Fetch, FetchError, Materializer, ResumeMode, RunContext, RunSummary,
    SharedProgress, StopSignal, WorkDispatcher,
};

use crate::config::QueryGenConfig;
use crate::dataset::{RowItem, load_rows};
use crate::llm::StructuredLlm;
use crate::transform::ResultsProjection;

/// What one generation run did.
#[derive(Debug, Clone)]
pub struct GenerateReport {
    pub run: RunSummary,
    /// Rows in results.csv after the run
    pub results: usize,
}

/// Generate a question for every (sampled) row not yet in the cache log.
pub fn generate(
    config: &QueryGenConfig,
    stop: StopSignal,
    progress: SharedProgress,
) -> Result<GenerateReport> {
    let llm = &config.llm;
    generate_with(
        config,
        |worker| {
            log::debug!("worker {worker}: connecting to {}", llm.base_url);
            StructuredLlm::new(llm, &config.prompt_template, &config.text_column)
        },
        stop,
        progress,
    )
}

/// [`generate`] with any per-worker client factory.
pub fn generate_with<F, M>(
    config: &QueryGenConfig,
    make_client: M,
    stop: StopSignal,
    progress: SharedProgress,
) -> Result<GenerateReport>
where
    F: Fetch<Item = RowItem>,
    M: Fn(usize) -> Result<F, FetchError> + Sync,
{
    config.validate()?;
    std::fs::create_dir_all(&config.root_dir)
        .with_context(|| format!("Failed to create {}", config.root_dir.display()))?;

    let mut required: Vec<&str> = config.id_columns.iter().map(String::as_str).collect();
    required.push(&config.text_column);
    let mut items: Vec<RowItem> = load_rows(&config.data_path, &required)?
        .into_iter()
        .map(|row| RowItem::new(row, &config.id_columns))
        .collect();
    if let Some(sampler) = config.sampler() {
        items = sampler.select(items)?;
    }

    let cache = config.cache_path();
    let done = DedupStore::load(&cache, ResumeMode::DedupSet)
        .with_context(|| format!("Failed to read {}", cache.display()))?;
    log::info!("{} rows already in {}", done.records(), cache.display());

    let ctx = RunContext {
        label: "querygen".to_string(),
        log: AppendLog::open(&cache, done)?,
        pacing: config.pacing.clone(),
        stop,
        progress,
    };
    let run = WorkDispatcher::new(&ctx, config.workers).run(items, make_client)?;
    run.log("Query generation");

    let projection = ResultsProjection {
        id_columns: config.id_columns.clone(),
        text_column: config.text_column.clone(),
    };
    let results_path = config.results_path();
    let stats = Materializer::new(projection, vec![results_path.clone()])?
        .materialize(&cache)
        .with_context(|| format!("Failed to write {}", results_path.display()))?;
    log::info!("Final CSV written to {}", results_path.display());

    Ok(GenerateReport {
        run,
        results: stats.rows.first().copied().unwrap_or(0),
    })
}
