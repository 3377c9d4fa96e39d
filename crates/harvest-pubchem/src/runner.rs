//! Download and parse stages

use anyhow::{Context, Result};
use harvest_core::{
    AppendLog, DedupStore, Fetch, MaterializeStats, Materializer, PacedFetcher, ResumeMode,
    RunContext, RunSummary, SharedProgress, StopSignal, cleanup_tmp_files, harvest,
};

use crate::client::PubChemClient;
use crate::config::{DownloadConfig, ParseConfig};
use crate::source::{Cid, CidSource, load_predefined_cids};
use crate::transform::CompoundProjection;

/// Fetch compound records into the log, resuming where the last run stopped.
pub fn download(
    config: &DownloadConfig,
    stop: StopSignal,
    progress: SharedProgress,
) -> Result<RunSummary> {
    let client = PubChemClient::new(&config.base_url, &config.http)
        .context("Failed to build PubChem client")?;
    download_with(config, client, stop, progress)
}

/// [`download`] with any compound fetcher.
pub fn download_with<F: Fetch<Item = Cid>>(
    config: &DownloadConfig,
    client: F,
    stop: StopSignal,
    progress: SharedProgress,
) -> Result<RunSummary> {
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Failed to create output directory {}", config.output_dir.display())
    })?;
    let log_path = config.log_path();

    let predefined = config
        .predefined_cids
        .as_deref()
        .map(load_predefined_cids)
        .transpose()?;
    let mode = if predefined.is_some() {
        ResumeMode::DedupSet
    } else {
        ResumeMode::Cursor
    };
    let done = DedupStore::load(&log_path, mode)
        .with_context(|| format!("Failed to read {}", log_path.display()))?;

    let mut source = match predefined {
        Some(cids) => {
            log::info!("Using predefined CID list with {} entries", cids.len());
            CidSource::list(cids)
        }
        None => {
            let next = done.next_numeric();
            if next == 1 {
                log::info!("No previous download found, starting from CID 1");
            } else {
                log::info!("Resuming download from CID {next}");
            }
            if next > config.max_cid {
                log::info!("All CIDs up to {} already downloaded", config.max_cid);
            }
            CidSource::resume_range(next, config.max_cid)
        }
    };

    let ctx = RunContext {
        label: "pubchem".to_string(),
        log: AppendLog::open(&log_path, done)?.with_sync(config.sync),
        pacing: config.pacing.clone(),
        stop,
        progress,
    };
    let mut fetcher = PacedFetcher::new(client, config.pacing.retry.clone());
    let summary = harvest(&ctx, &mut source, &mut fetcher, None)?;
    summary.log("PubChem download");
    Ok(summary)
}

/// Rebuild `compounds.csv` and `descriptions.csv` from the compound log.
pub fn parse(config: &ParseConfig) -> Result<MaterializeStats> {
    for path in [&config.compounds_csv, &config.descriptions_csv] {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            cleanup_tmp_files(dir)?;
        }
    }
    let materializer = Materializer::new(
        CompoundProjection,
        vec![config.compounds_csv.clone(), config.descriptions_csv.clone()],
    )?;
    let stats = materializer
        .materialize(&config.log_path)
        .with_context(|| format!("Failed to materialize {}", config.log_path.display()))?;
    log::info!(
        "Parsed {} records ({} failed, {} malformed lines skipped)",
        stats.records,
        stats.failures,
        stats.malformed
    );
    Ok(stats)
}
