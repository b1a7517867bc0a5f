//! CLI entry point for the bike flow tracker.
//!
//! Provides subcommands for fetching fleet snapshots, diffing the two
//! newest ones into arrival/departure events, computing daily metrics,
//! and exporting persisted events to CSV.

use anyhow::Result;
use bike_flow::export::append_events;
use bike_flow::fetch::{BasicClient, DEFAULT_URL, fetch_snapshot, save_snapshot};
use bike_flow::metrics::compute_daily_metrics;
use bike_flow::pipeline::run_diff;
use bike_flow::sink::{open, read_events};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "bike_flow")]
#[command(about = "Derives bike arrival/departure events from fleet snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one snapshot from the fleet API and save it
    Fetch {
        /// Directory to save the snapshot into
        #[arg(short, long, default_value = "data/raw/api")]
        data_dir: PathBuf,
    },
    /// Diff the two newest snapshots and persist the derived events
    Diff {
        /// Directory containing saved snapshots
        #[arg(short, long, default_value = "data/raw/api")]
        data_dir: PathBuf,

        /// SQLite database holding the event table
        #[arg(long, default_value = "data/processed/bike_data.db")]
        db: PathBuf,
    },
    /// Fetch a fresh snapshot, then diff (the periodic ETL entry point)
    Run {
        #[arg(short, long, default_value = "data/raw/api")]
        data_dir: PathBuf,

        #[arg(long, default_value = "data/processed/bike_data.db")]
        db: PathBuf,
    },
    /// Print daily event metrics as JSON
    Metrics {
        /// Day to aggregate, YYYY-MM-DD
        #[arg(value_name = "DAY")]
        day: String,

        #[arg(long, default_value = "data/processed/bike_data.db")]
        db: PathBuf,
    },
    /// Export persisted events to a CSV file
    Export {
        /// CSV file to append rows to
        #[arg(short, long, default_value = "data/processed/events.csv")]
        output: PathBuf,

        /// Restrict the export to one day, YYYY-MM-DD
        #[arg(long)]
        day: Option<String>,

        #[arg(long, default_value = "data/processed/bike_data.db")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/bike_flow.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bike_flow.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch { data_dir } => {
            fetch_one(&data_dir).await?;
        }
        Commands::Diff { data_dir, db } => {
            report_diff(&data_dir, &db)?;
        }
        Commands::Run { data_dir, db } => {
            // A failed fetch aborts the run before any diff is attempted;
            // the next periodic invocation simply tries again.
            if let Err(e) = fetch_one(&data_dir).await {
                error!(error = %e, "Snapshot fetch failed; aborting run");
                return Err(e);
            }
            report_diff(&data_dir, &db)?;
        }
        Commands::Metrics { day, db } => {
            let conn = open(&db)?;
            let metrics = compute_daily_metrics(&conn, &day)?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Export { output, day, db } => {
            let conn = open(&db)?;
            let events = read_events(&conn, day.as_deref())?;
            let written = append_events(&output, &events)?;
            info!(rows = written, output = %output.display(), "Export complete");
        }
    }

    Ok(())
}

/// Fetches a fresh snapshot and stores it under the naming convention.
#[tracing::instrument(skip_all, fields(data_dir = %data_dir.display()))]
async fn fetch_one(data_dir: &Path) -> Result<PathBuf> {
    let url = std::env::var("BIKE_FLOW_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let client = BasicClient::new()?;
    let fetched_at = Local::now();

    info!(url = %url, "Fetching fleet snapshot");
    let payload = fetch_snapshot(&client, &url, &fetched_at).await?;
    save_snapshot(&payload, data_dir, &fetched_at)
}

fn report_diff(data_dir: &Path, db: &Path) -> Result<()> {
    let report = run_diff(data_dir, db)?;
    match &report.compared {
        Some((prev, curr)) => info!(
            prev = %prev.display(),
            curr = %curr.display(),
            events = report.events_recorded,
            skipped = report.skipped_candidates,
            "Recorded events"
        ),
        None => warn!(
            skipped = report.skipped_candidates,
            "Not enough snapshots to compare"
        ),
    }
    Ok(())
}
