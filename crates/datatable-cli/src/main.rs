//! `datatable`: inspect, dump and analyse column-oriented table files.
//!
//! Usage:
//!   datatable inspect data.dt
//!   datatable rows data.dt --limit 20
//!   datatable analyse data.dt --column 2
//!
//! Set `RUST_LOG=debug` for open/scan diagnostics.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datatable::analysis::{analyse_buffer, CastToNumericAnalysis, DistinctIndexer};
use datatable::{
    CancellationToken, ColumnInfo, ColumnOrientedTable, ProgressNotification, ScanOptions,
    ScanStatus, TableOptions, DEFAULT_BLOCK_SIZE,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "datatable")]
#[command(about = "Inspect and analyse column-oriented datatable files")]
#[command(version)]
struct Args {
    /// Elements per block when reading columns.
    #[arg(long, global = true, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print row count, column types and per-column metadata as JSON.
    Inspect { file: PathBuf },
    /// Print rows as tab-separated values, preceded by column names.
    Rows {
        file: PathBuf,
        /// Stop after this many rows.
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Analyse one column and print the resulting metadata as JSON.
    ///
    /// Numeric columns get the numeric cast analysis; every other column is
    /// distinct-indexed.
    Analyse {
        file: PathBuf,
        #[arg(long)]
        column: usize,
    },
}

#[derive(Serialize)]
struct Summary<'a> {
    row_count: u64,
    column_count: usize,
    columns: &'a [ColumnInfo],
}

/// Forwards scan progress to the log.
struct LogProgress;

impl ProgressNotification for LogProgress {
    fn on_start(&self, message: Option<&str>) {
        log::info!("{}", message.unwrap_or("scan started"));
    }

    fn on_progress(&self, progress: f32) {
        log::debug!("{:.0}%", progress * 100.0);
    }

    fn on_complete(&self, cancelled: bool) {
        if cancelled {
            log::info!("scan stopped early");
        }
    }
}

fn open(path: &Path, block_size: usize) -> Result<ColumnOrientedTable> {
    let options = TableOptions {
        block_size,
        ..TableOptions::default()
    };
    ColumnOrientedTable::open_path(path, options)
        .with_context(|| format!("open table {}", path.display()))
}

fn inspect(table: &ColumnOrientedTable, out: &mut impl Write) -> Result<()> {
    let summary = Summary {
        row_count: table.row_count(),
        column_count: table.column_count(),
        columns: table.columns(),
    };
    serde_json::to_writer_pretty(&mut *out, &summary)?;
    writeln!(out)?;
    Ok(())
}

async fn rows(table: &ColumnOrientedTable, limit: Option<u64>, out: &mut impl Write) -> Result<()> {
    let names: Vec<String> = table
        .columns()
        .iter()
        .map(|c| c.name().map_or_else(|| format!("column{}", c.index), str::to_owned))
        .collect();
    writeln!(out, "{}", names.join("\t"))?;

    let limit = limit.unwrap_or(u64::MAX);
    if limit == 0 {
        return Ok(());
    }
    let cancel = CancellationToken::new();
    let status = table
        .for_each_row(
            |index, row| {
                if index >= limit {
                    return Ok(());
                }
                let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                writeln!(out, "{}", line.join("\t"))?;
                if index + 1 == limit {
                    cancel.cancel();
                }
                Ok::<_, anyhow::Error>(())
            },
            ScanOptions::default().with_cancel(&cancel),
        )
        .await?;
    log::debug!("row dump finished: {status:?}");
    Ok(())
}

async fn analyse(table: &ColumnOrientedTable, column: usize, out: &mut impl Write) -> Result<()> {
    let info = table.column_info(column)?;
    let mut metadata = info.metadata.clone();
    let message = format!("analysing column {column} ({})", info.column_type);
    let scan = ScanOptions::default()
        .with_notify(&LogProgress)
        .with_message(&message);

    let status = if info.column_type.is_numeric() {
        let mut reader = table.column::<f64>(column)?;
        analyse_buffer(reader.as_mut(), &mut CastToNumericAnalysis::new(), &mut metadata, scan).await?
    } else {
        let mut reader = table.column::<String>(column)?;
        analyse_buffer(reader.as_mut(), &mut DistinctIndexer::new(), &mut metadata, scan).await?
    };
    if status == ScanStatus::Cancelled {
        anyhow::bail!("analysis of column {column} was cancelled");
    }

    serde_json::to_writer_pretty(&mut *out, &metadata)?;
    writeln!(out)?;
    Ok(())
}

async fn run(args: Args, out: &mut impl Write) -> Result<()> {
    match args.command {
        Command::Inspect { file } => inspect(&open(&file, args.block_size)?, out),
        Command::Rows { file, limit } => rows(&open(&file, args.block_size)?, limit, out).await,
        Command::Analyse { file, column } => {
            let table = open(&file, args.block_size)?;
            analyse(&table, column, out)
                .await
                .with_context(|| format!("analyse column {column} of {}", file.display()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(args, &mut out).await
}
