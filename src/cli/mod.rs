pub mod config;
pub mod lookup;
pub mod predict;
pub mod shell;
pub mod stats;

use std::path::Path;

use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::index::{self, Index, IngestReport};
use crate::models::{PredictionMap, Row};
use crate::settings::Settings;

#[derive(Parser)]
#[command(
    name = "txlens",
    version,
    about = "Look up transactions by id, summarize them and score them against a prediction service."
)]
pub struct Cli {
    /// More log output on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show every row recorded for an id.
    Lookup {
        /// Delimited transaction file
        file: String,
        /// Id to look up (first column)
        id: String,
    },
    /// Totals, sale types, merchants and the amount time series for an id.
    Stats {
        /// Delimited transaction file
        file: String,
        /// Id to look up (first column)
        id: String,
    },
    /// Request a prediction for every row of an id.
    Predict {
        /// Delimited transaction file
        file: String,
        /// Id to look up (first column)
        id: String,
        /// Scoring service base URL (default from settings or TXLENS_API_URL)
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Interactive session: load a file once, then look up, summarize and predict.
    Shell {
        /// File to load on start
        file: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Show or change settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the current settings.
    Show,
    /// Set the scoring service base URL.
    SetEndpoint {
        url: String,
    },
    /// Force a delimiter (`,` `;` `|` `tab`) or go back to `auto`.
    SetDelimiter {
        delimiter: String,
    },
    /// Cap concurrent prediction requests; 0 removes the cap.
    SetMaxInFlight {
        limit: usize,
    },
    /// Per-request timeout in seconds; 0 removes it.
    SetTimeout {
        secs: u64,
    },
}

// ---------------------------------------------------------------------------
// Shared rendering
// ---------------------------------------------------------------------------

pub(crate) fn ingest(file: &str, settings: &Settings) -> Result<(Index, IngestReport)> {
    index::load(Path::new(file), &settings.parse_options())
}

pub(crate) fn format_report(report: &IngestReport) -> String {
    let skipped = report.missing_key + report.empty + report.malformed;
    let mut out = format!(
        "{} ids, {} rows indexed from {}",
        report.groups.to_string().bold(),
        report.indexed,
        report.source
    );
    if skipped > 0 {
        out.push_str(&format!(
            " ({} skipped: {} without id, {} blank, {} malformed)",
            skipped, report.missing_key, report.empty, report.malformed
        ));
    }
    out
}

/// One line per row with its position, fields and, when given, its
/// prediction.
pub(crate) fn format_rows(
    header: &[String],
    rows: &[Row],
    predictions: Option<&PredictionMap>,
) -> String {
    let width = rows.iter().map(Row::len).max().unwrap_or(0).max(header.len());
    let mut table = Table::new();
    let mut columns = vec!["#".to_string()];
    columns.extend((0..width).map(|i| {
        header
            .get(i)
            .filter(|h| !h.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("field {}", i + 1))
    }));
    if predictions.is_some() {
        columns.push("Prediction".to_string());
        columns.push("Confidence".to_string());
    }
    table.set_header(columns);

    for (pos, row) in rows.iter().enumerate() {
        let mut cells = vec![Cell::new(pos + 1)];
        cells.extend((0..width).map(|i| Cell::new(row.get(i).unwrap_or(""))));
        if let Some(predictions) = predictions {
            match predictions.get(&pos) {
                Some(p) => {
                    cells.push(Cell::new(crate::fmt::score(p.score).green()));
                    cells.push(Cell::new(
                        p.confidence.map(crate::fmt::percent).unwrap_or_default(),
                    ));
                }
                None => {
                    cells.push(Cell::new("-".dimmed()));
                    cells.push(Cell::new(""));
                }
            }
        }
        table.add_row(cells);
    }
    table.to_string()
}

pub(crate) fn no_match(id: &str) -> String {
    format!("No records for id {}", id.bold())
}
