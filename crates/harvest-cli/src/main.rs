//! harvest - resumable, rate-limited harvesting pipelines
//!
//! Fetches PubChem compound records, ChemRxiv preprints, and LLM-generated
//! questions into append-only logs, and builds CSV tables from them.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use harvest_core::{ProgressContext, StopSignal, Verbosity};

mod cmd;
mod config;

use cmd::Outcome;
use config::Config;

/// Exit status after SIGINT/SIGTERM.
const EXIT_STOPPED: u8 = 130;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Resumable, rate-limited harvesting pipelines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./harvest.toml or ~/.config/harvest/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// PubChem compound records
    Pubchem(cmd::pubchem::PubChemArgs),
    /// ChemRxiv preprint metadata and PDFs
    Chemrxiv(cmd::chemrxiv::ChemRxivArgs),
    /// Generate one question per dataset row with an LLM
    Querygen(cmd::querygen::QueryGenArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(ProgressContext::new());

    // Logging:
    //   TTY:     warn unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let verbosity = match (cli.debug, is_tty) {
        (true, _) => Verbosity::Debug,
        (false, true) => Verbosity::Quiet,
        (false, false) => Verbosity::Normal,
    };
    let multi = if is_tty { Some(progress.multi()) } else { None };
    if let Err(e) = harvest_core::init_logging(verbosity, multi) {
        eprintln!("warning: logger already set: {e}");
    }

    match run(cli, &progress) {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::Stopped) => ExitCode::from(EXIT_STOPPED),
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, progress: &harvest_core::SharedProgress) -> Result<Outcome> {
    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    if matches!(cli.command, Command::Config) {
        print_config(&config);
        return Ok(Outcome::Completed);
    }

    let stop = StopSignal::install()?;
    match cli.command {
        Command::Pubchem(args) => cmd::pubchem::run(args, &config, stop, progress),
        Command::Chemrxiv(args) => cmd::chemrxiv::run(args, &config, stop, progress),
        Command::Querygen(args) => cmd::querygen::run(args, &config, stop, progress),
        Command::Config => Ok(Outcome::Completed),
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let pubchem = &config.pubchem;
    table.add_row(vec![
        "PubChem output",
        &pubchem.output_dir.display().to_string(),
    ]);
    table.add_row(vec!["PubChem max CID", &pubchem.max_cid.to_string()]);
    table.add_row(vec![
        "PubChem CID list",
        &pubchem
            .predefined_cids
            .as_ref()
            .map_or_else(|| "none (range)".to_string(), |p| p.display().to_string()),
    ]);
    let p = pubchem.download().pacing;
    table.add_row(vec![
        "PubChem pacing",
        &format!(
            "{:?} per request, {}s every {} items",
            p.request_delay,
            p.batch_delay.as_secs(),
            p.batch_size
        ),
    ]);

    let chemrxiv = &config.chemrxiv;
    table.add_row(vec![
        "ChemRxiv output",
        &chemrxiv.output_dir.display().to_string(),
    ]);
    table.add_row(vec!["ChemRxiv API", &chemrxiv.base_url]);
    table.add_row(vec!["ChemRxiv page size", &chemrxiv.page_size.to_string()]);
    let parse = chemrxiv.parse();
    table.add_row(vec!["ChemRxiv TEI dir", &parse.tei_dir.display().to_string()]);
    table.add_row(vec![
        "ChemRxiv unigram counts",
        &parse
            .unigram_counts
            .as_ref()
            .map_or_else(|| "none (filter off)".to_string(), |p| p.display().to_string()),
    ]);

    let qg = &config.querygen;
    table.add_row(vec!["Querygen dataset", &qg.data_path.display().to_string()]);
    table.add_row(vec!["Querygen job dir", &qg.root_dir.display().to_string()]);
    table.add_row(vec!["Querygen id columns", &qg.id_columns.join(", ")]);
    table.add_row(vec!["Querygen workers", &qg.workers.to_string()]);
    let sample = match (qg.sample_size, qg.sample_frac) {
        (Some(n), _) => format!("{n} rows"),
        (None, Some(f)) => format!("{:.1}%", f * 100.0),
        (None, None) => "all rows".to_string(),
    };
    table.add_row(vec!["Querygen sample", &sample]);
    table.add_row(vec!["LLM endpoint", &qg.llm.base_url]);
    table.add_row(vec!["LLM model", &qg.llm.model]);
    table.add_row(vec![
        "LLM API key",
        if qg.llm.api_key.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);

    let cooldowns = |max: Option<u32>| max.map_or_else(|| "unbounded".to_string(), |n| n.to_string());
    table.add_row(vec![
        "Max cooldowns",
        &format!(
            "pubchem {}, chemrxiv {}, querygen {}",
            cooldowns(pubchem.pacing.max_cooldowns),
            cooldowns(chemrxiv.pacing.max_cooldowns),
            cooldowns(qg.pacing.max_cooldowns)
        ),
    ]);

    eprintln!("\n{table}");
}
