//! Gather and download stages

use anyhow::{Context, Result};
use harvest_core::retry::retry_with_backoff;
use harvest_core::{
    AppendLog, DedupStore, Fetch, IncrementalMaterializer, ItemSource, ListSource,
    MaterializeStats, Materializer, PacedFetcher, Pacing, ResumeMode, RunContext, RunSummary,
    SharedProgress, StopSignal, cleanup_tmp_files, harvest,
};

use crate::api::{ChemRxivApi, HitPassthrough, PageApi, PreprintSource};
use crate::config::{DownloadConfig, GatherConfig, ParseConfig};
use crate::download::{PdfDownloader, PdfJob, jobs_from_log};
use crate::paragraphs::{ParagraphExtractor, ParagraphFilter, ParagraphProjection, tei_jobs};
use crate::transform::MetadataProjection;
use crate::unigram::UnigramModel;

fn ensure_parent(path: &std::path::Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

/// Walk the listing, logging new preprints and appending their metadata rows.
///
/// The metadata CSV is rebuilt from the log once the walk ends, whether or
/// not it succeeded.
pub fn gather(
    config: &GatherConfig,
    stop: StopSignal,
    progress: SharedProgress,
) -> Result<RunSummary> {
    let api = ChemRxivApi::new(&config.base_url, &config.http)
        .context("Failed to build ChemRxiv client")?;
    gather_with(config, api, stop, progress)
}

/// [`gather`] with any listing API.
pub fn gather_with<A: PageApi>(
    config: &GatherConfig,
    api: A,
    stop: StopSignal,
    progress: SharedProgress,
) -> Result<RunSummary> {
    ensure_parent(&config.log_path)?;
    ensure_parent(&config.csv_path)?;

    let done = DedupStore::load(&config.log_path, ResumeMode::DedupSet)
        .with_context(|| format!("Failed to read {}", config.log_path.display()))?;
    log::info!("{} preprints already gathered", done.records());

    let mut source = PreprintSource::new(api, config.page_size);
    let (primed, _) =
        retry_with_backoff("chemrxiv listing", &config.pacing.retry, &stop, || source.prime());
    if primed.is_err() && stop.is_stopped() {
        log::info!("Stopped before the first listing page");
        return Ok(RunSummary {
            interrupted: true,
            ..RunSummary::empty()
        });
    }
    primed.context("Failed to fetch the first listing page")?;
    if let Some(total) = source.size_hint() {
        log::info!("Listing reports {total} preprints");
    }

    let mut csv = IncrementalMaterializer::open(
        MetadataProjection,
        std::slice::from_ref(&config.csv_path),
        config.pacing.batch_size,
    )?;
    let ctx = RunContext {
        label: "chemrxiv".to_string(),
        log: AppendLog::open(&config.log_path, done)?,
        pacing: config.pacing.clone(),
        stop,
        progress,
    };
    let mut fetcher = PacedFetcher::new(HitPassthrough, config.pacing.retry.clone());
    let outcome = harvest(&ctx, &mut source, &mut fetcher, Some(&mut csv));
    drop(csv);
    let rebuilt = materialize_metadata(config);
    let summary = outcome?;
    rebuilt?;
    if source.without_id() > 0 {
        log::warn!("{} listing hits had no id and were skipped", source.without_id());
    }
    summary.log("ChemRxiv gather");
    Ok(summary)
}

/// Replace the metadata CSV with one row per preprint in the gather log.
pub fn materialize_metadata(config: &GatherConfig) -> Result<MaterializeStats> {
    if let Some(dir) = config.csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        cleanup_tmp_files(dir)?;
    }
    let stats = Materializer::new(MetadataProjection, vec![config.csv_path.clone()])?
        .materialize(&config.log_path)
        .with_context(|| format!("Failed to write {}", config.csv_path.display()))?;
    log::info!(
        "Metadata CSV rebuilt: {} preprints ({} malformed lines skipped)",
        stats.records,
        stats.malformed
    );
    Ok(stats)
}

/// Download the PDF of every gathered preprint not yet on disk.
pub fn download(
    config: &DownloadConfig,
    stop: StopSignal,
    progress: SharedProgress,
) -> Result<RunSummary> {
    let client = PdfDownloader::new(&config.http).context("Failed to build download client")?;
    download_with(config, client, stop, progress)
}

/// [`download`] with any PDF fetcher.
pub fn download_with<F: Fetch<Item = PdfJob>>(
    config: &DownloadConfig,
    client: F,
    stop: StopSignal,
    progress: SharedProgress,
) -> Result<RunSummary> {
    std::fs::create_dir_all(&config.download_dir).with_context(|| {
        format!("Failed to create download directory {}", config.download_dir.display())
    })?;
    cleanup_tmp_files(&config.download_dir)?;

    let list = jobs_from_log(&config.metadata_log, &config.download_dir)
        .with_context(|| format!("Failed to read {}", config.metadata_log.display()))?;
    log::info!(
        "{} PDFs to fetch ({} already on disk, {} without a PDF link)",
        list.jobs.len(),
        list.on_disk,
        list.without_url
    );

    let log_path = config.log_path();
    let done = DedupStore::load(&log_path, ResumeMode::DedupSet)
        .with_context(|| format!("Failed to read {}", log_path.display()))?;
    let ctx = RunContext {
        label: "pdf".to_string(),
        log: AppendLog::open(&log_path, done)?,
        pacing: config.pacing.clone(),
        stop,
        progress,
    };
    let mut fetcher = PacedFetcher::new(client, config.pacing.retry.clone());
    let summary = harvest(&ctx, &mut ListSource::new(list.jobs), &mut fetcher, None)?;
    summary.log("ChemRxiv download");
    Ok(summary)
}

/// What one paragraph run did.
#[derive(Debug, Clone)]
pub struct ParseReport {
    pub run: RunSummary,
    /// Rows in the paragraph CSV after the run
    pub paragraphs: usize,
}

/// Turn every GROBID TEI file not yet parsed into filtered paragraphs, then
/// rebuild the paragraph CSV from the paragraph log.
pub fn parse(
    config: &ParseConfig,
    stop: StopSignal,
    progress: SharedProgress,
) -> Result<ParseReport> {
    std::fs::create_dir_all(&config.paragraph_dir).with_context(|| {
        format!("Failed to create paragraph directory {}", config.paragraph_dir.display())
    })?;
    ensure_parent(&config.csv_path)?;

    let jobs = tei_jobs(&config.tei_dir)
        .with_context(|| format!("Failed to list {}", config.tei_dir.display()))?;
    log::info!("{} TEI files in {}", jobs.len(), config.tei_dir.display());

    let unigram = config
        .unigram_counts
        .as_deref()
        .map(|path| {
            UnigramModel::load(path)
                .with_context(|| format!("Failed to load unigram counts {}", path.display()))
        })
        .transpose()?;
    if unigram.is_none() {
        log::info!("No unigram counts configured, skipping the log-probability filter");
    }

    let log_path = config.log_path();
    let done = DedupStore::load(&log_path, ResumeMode::DedupSet)
        .with_context(|| format!("Failed to read {}", log_path.display()))?;
    let pacing = Pacing::immediate();
    let ctx = RunContext {
        label: "tei".to_string(),
        log: AppendLog::open(&log_path, done)?,
        pacing: pacing.clone(),
        stop,
        progress,
    };
    let extractor = ParagraphExtractor {
        json_dir: config.paragraph_dir.clone(),
        concat_per_div: config.concat_per_div,
        filter: ParagraphFilter {
            min_words: config.min_words,
            unigram,
            min_log_prob: config.min_log_prob,
        },
    };
    let mut fetcher = PacedFetcher::new(extractor, pacing.retry);
    let outcome = harvest(&ctx, &mut ListSource::new(jobs), &mut fetcher, None);

    if let Some(dir) = config.csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        cleanup_tmp_files(dir)?;
    }
    let stats = Materializer::new(ParagraphProjection, vec![config.csv_path.clone()])?
        .materialize(&log_path)
        .with_context(|| format!("Failed to write {}", config.csv_path.display()))?;
    let run = outcome?;
    run.log("ChemRxiv parse");

    Ok(ParseReport {
        run,
        paragraphs: stats.rows.first().copied().unwrap_or(0),
    })
}
