pub mod chemrxiv;
pub mod pubchem;
pub mod querygen;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use harvest_core::RunSummary;

/// How a command ended, for the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Stopped,
}

impl Outcome {
    pub fn of(summary: &RunSummary) -> Self {
        if summary.interrupted {
            Self::Stopped
        } else {
            Self::Completed
        }
    }
}

/// Print a key-value summary table on stderr
pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}

/// Rows shared by every harvesting run.
pub fn summary_rows(summary: &RunSummary) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("Items seen", summary.total.to_string()),
        ("Already done", summary.skipped.to_string()),
        ("Succeeded", summary.succeeded.to_string()),
        ("Failed", summary.failed.to_string()),
    ];
    if summary.duplicates > 0 {
        rows.push(("Duplicates", summary.duplicates.to_string()));
    }
    rows.push(("Batch pauses", summary.long_pauses.to_string()));
    rows.push(("Cooldowns", summary.cooldowns.to_string()));
    rows.push(("Elapsed", format!("{:.1}s", summary.elapsed.as_secs_f64())));
    if summary.interrupted {
        rows.push(("Status", "stopped, rerun to resume".to_string()));
    }
    rows
}
