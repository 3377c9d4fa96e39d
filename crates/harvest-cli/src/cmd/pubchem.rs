//! PubChem subcommand - compound records and their tables

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use harvest_core::{SharedProgress, StopSignal};

use super::{Outcome, print_summary, summary_rows};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct PubChemArgs {
    #[command(subcommand)]
    pub stage: PubChemStage,
}

#[derive(Subcommand, Debug)]
pub enum PubChemStage {
    /// Fetch compound records into the log
    Download(DownloadArgs),
    /// Build compounds.csv and descriptions.csv from the log
    Parse(ParseArgs),
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Highest CID to fetch
    #[arg(long)]
    pub max_cid: Option<u64>,

    /// JSON array of CIDs to fetch instead of the range
    #[arg(long)]
    pub cids: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Directory holding compounds.jsonl
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(
    args: PubChemArgs,
    config: &Config,
    stop: StopSignal,
    progress: &SharedProgress,
) -> Result<Outcome> {
    match args.stage {
        PubChemStage::Download(a) => download(a, config, stop, progress),
        PubChemStage::Parse(a) => parse(a, config),
    }
}

fn download(
    args: DownloadArgs,
    config: &Config,
    stop: StopSignal,
    progress: &SharedProgress,
) -> Result<Outcome> {
    let mut download = config.pubchem.download();
    if let Some(dir) = args.output {
        download.output_dir = dir;
    }
    if let Some(max_cid) = args.max_cid {
        download.max_cid = max_cid;
    }
    if args.cids.is_some() {
        download.predefined_cids = args.cids;
    }

    let summary = harvest_pubchem::download(&download, stop, progress.clone())?;
    let mut rows = summary_rows(&summary);
    rows.push(("Log", download.log_path().display().to_string()));
    print_summary("PubChem download", &rows);
    Ok(Outcome::of(&summary))
}

fn parse(args: ParseArgs, config: &Config) -> Result<Outcome> {
    let parse = match args.output {
        Some(dir) => harvest_pubchem::ParseConfig::in_dir(&dir),
        None => config.pubchem.parse(),
    };
    let stats = harvest_pubchem::parse(&parse)?;
    print_summary(
        "PubChem parse",
        &[
            ("Records", stats.records.to_string()),
            ("Failed records", stats.failures.to_string()),
            ("Malformed lines", stats.malformed.to_string()),
            (
                "Compound rows",
                stats.rows.first().copied().unwrap_or(0).to_string(),
            ),
            (
                "Description rows",
                stats.rows.get(1).copied().unwrap_or(0).to_string(),
            ),
            ("Output", parse.compounds_csv.display().to_string()),
        ],
    );
    Ok(Outcome::Completed)
}
