//! Querygen subcommand - one generated question per dataset row

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use harvest_core::{SharedProgress, StopSignal};

use super::{Outcome, print_summary, summary_rows};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct QueryGenArgs {
    /// Dataset CSV
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Job directory
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Model name
    #[arg(short, long)]
    pub model: Option<String>,
}

pub fn run(
    args: QueryGenArgs,
    config: &Config,
    stop: StopSignal,
    progress: &SharedProgress,
) -> Result<Outcome> {
    let mut qg = config.querygen.to_config();
    if let Some(data) = args.data {
        qg.data_path = data;
    }
    if let Some(root) = args.root {
        qg.root_dir = root;
    }
    if let Some(workers) = args.workers {
        qg.workers = workers;
    }
    if let Some(model) = args.model {
        qg.llm.model = model;
    }
    if qg.llm.api_key.is_none() {
        log::warn!("No API key configured for {}", qg.llm.base_url);
    }

    let report = harvest_querygen::generate(&qg, stop, progress.clone())?;
    let mut rows = summary_rows(&report.run);
    rows.push(("Workers", qg.workers.to_string()));
    rows.push(("Result rows", report.results.to_string()));
    rows.push(("Results", qg.results_path().display().to_string()));
    print_summary("Query generation", &rows);
    Ok(Outcome::of(&report.run))
}
