//! Squall CLI: daily trading-report ETL job.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::info;

use squall::{Config, Pipeline, init_tracing};

/// Daily batch ETL: aggregate per-minute trading records from object
/// storage into daily OHLC reports.
#[derive(Debug, Parser)]
#[command(name = "squall", version)]
struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Pin "today" to a fixed date (YYYY-MM-DD) instead of the wall clock.
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let config = match Config::from_path(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        source = %config.source.url,
        target = %config.target.url,
        "Starting daily report pipeline"
    );

    let pipeline = match Pipeline::from_config(config).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to build pipeline: {e}");
            return ExitCode::FAILURE;
        }
    };

    let today = args.as_of.unwrap_or_else(|| Utc::now().date_naive());

    match pipeline.run(today).await {
        Ok(summary) => {
            info!(
                dates = summary.extraction_dates.len(),
                rows_extracted = summary.rows_extracted,
                report_rows = summary.report_rows,
                report_key = summary.report_key.as_deref().unwrap_or("<none>"),
                "Pipeline finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Pipeline failed: {e}");
            ExitCode::FAILURE
        }
    }
}
