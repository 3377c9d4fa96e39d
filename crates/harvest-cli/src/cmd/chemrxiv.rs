//! ChemRxiv subcommand - preprint metadata, PDFs and paragraphs

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use harvest_core::{SharedProgress, StopSignal};

use super::{Outcome, print_summary, summary_rows};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ChemRxivArgs {
    #[command(subcommand)]
    pub stage: ChemRxivStage,
}

#[derive(Subcommand, Debug)]
pub enum ChemRxivStage {
    /// Walk the listing and record preprint metadata
    Gather(StageArgs),
    /// Fetch the PDF of every gathered preprint
    Download(StageArgs),
    /// Extract filtered paragraphs from GROBID TEI files
    Parse(ParseArgs),
}

#[derive(Args, Debug)]
pub struct StageArgs {
    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ParseArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    /// Directory of GROBID TEI files
    #[arg(long)]
    pub tei: Option<PathBuf>,

    /// Join the paragraphs of each section into one entry
    #[arg(long)]
    pub concat_per_div: bool,
}

pub fn run(
    args: ChemRxivArgs,
    config: &Config,
    stop: StopSignal,
    progress: &SharedProgress,
) -> Result<Outcome> {
    let mut section = config.chemrxiv.clone();
    let (ChemRxivStage::Gather(stage)
    | ChemRxivStage::Download(stage)
    | ChemRxivStage::Parse(ParseArgs { stage, .. })) = &args.stage;
    if let Some(dir) = &stage.output {
        section.output_dir = dir.clone();
    }

    match args.stage {
        ChemRxivStage::Gather(_) => {
            let gather = section.gather();
            let summary = harvest_chemrxiv::gather(&gather, stop, progress.clone())?;
            let mut rows = summary_rows(&summary);
            rows.push(("Metadata", gather.csv_path.display().to_string()));
            print_summary("ChemRxiv gather", &rows);
            Ok(Outcome::of(&summary))
        }
        ChemRxivStage::Download(_) => {
            let download = section.download();
            let summary = harvest_chemrxiv::download(&download, stop, progress.clone())?;
            let mut rows = summary_rows(&summary);
            rows.push(("PDFs", download.download_dir.display().to_string()));
            print_summary("ChemRxiv download", &rows);
            Ok(Outcome::of(&summary))
        }
        ChemRxivStage::Parse(parse_args) => {
            let mut parse = section.parse();
            if let Some(dir) = parse_args.tei {
                parse.tei_dir = dir;
            }
            parse.concat_per_div |= parse_args.concat_per_div;
            let report = harvest_chemrxiv::parse(&parse, stop, progress.clone())?;
            let mut rows = summary_rows(&report.run);
            rows.push(("Paragraphs", report.paragraphs.to_string()));
            rows.push(("Table", parse.csv_path.display().to_string()));
            print_summary("ChemRxiv parse", &rows);
            Ok(Outcome::of(&report.run))
        }
    }
}
