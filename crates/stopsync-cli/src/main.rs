//! Stopsync CLI
//!
//! Unified command-line interface for:
//! - Running the full snapshot/diff/enrich/merge pipeline (`run`)
//! - Diffing two snapshot tables offline (`diff`)
//! - Summarizing a corrections table (`report`)

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::Level;

use stopsync_catalog::{diff as diff_snapshots, NameSource};
use stopsync_datamall::{DataMallClient, DataMallConfig};
use stopsync_pipeline::{Pipeline, PipelineConfig, RunReport, SchedulerConfig};
use stopsync_simplygo::{SimplyGoClient, SimplyGoConfig};
use stopsync_store::{
    read_final_table, read_snapshot_table, snapshot_date_from_file_name, write_change_report,
    DataDirStore,
};

const ACCOUNT_KEY_ENV: &str = "DATAMALL_ACCOUNT_KEY";

#[derive(Parser)]
#[command(name = "stopsync")]
#[command(
    author,
    version,
    about = "Bus stop catalog reconciliation and selective enrichment"
)]
struct Cli {
    /// Log verbosity: error, warn, info, debug, or trace.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current catalog, diff it against the stored previous
    /// snapshot, enrich changed stops from the eGuide, and write the
    /// corrections table.
    Run {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Diff two snapshot CSVs without fetching anything.
    Diff {
        /// Previous snapshot CSV.
        previous: PathBuf,
        /// Current snapshot CSV.
        current: PathBuf,
        /// Also write the change report table here.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Summarize a corrections CSV.
    Report {
        /// Corrections table.
        #[arg(default_value = "data/corrections.csv")]
        table: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// DataMall account key; falls back to the DATAMALL_ACCOUNT_KEY
    /// environment variable.
    #[arg(long)]
    api_key: Option<String>,

    /// Directory for snapshots, checkpoints, and corrections.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Concurrent lookup workers.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Completions between checkpoint writes.
    #[arg(long, default_value_t = 20)]
    batch_size: usize,

    /// Cap the number of enrichment lookups (test mode).
    #[arg(long)]
    limit: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Restore checkpointed results from an interrupted run on the same day.
    #[arg(long)]
    resume: bool,

    /// Skip lookups entirely; every record passes through as Original.
    #[arg(long)]
    skip_enrichment: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Commands::Run { args } => cmd_run(args),
        Commands::Diff {
            previous,
            current,
            out,
        } => cmd_diff(&previous, &current, out.as_deref()),
        Commands::Report { table } => cmd_report(&table),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow!("unrecognized log level: {level}"))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
    Ok(())
}

// ============================================================================
// run
// ============================================================================

fn cmd_run(args: RunArgs) -> Result<()> {
    let account_key = args
        .api_key
        .or_else(|| env::var(ACCOUNT_KEY_ENV).ok())
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            anyhow!("no DataMall account key: pass --api-key or set {ACCOUNT_KEY_ENV}")
        })?;

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, shutdown.clone())
            .map_err(|e| anyhow!("failed to register signal handler: {e}"))?;
    }

    let store = Arc::new(
        DataDirStore::open(args.data_dir)
            .context("failed to open data directory")?,
    );

    let request_timeout = Duration::from_secs(args.timeout_secs);
    let source = Arc::new(DataMallClient::new(DataMallConfig {
        request_timeout,
        ..DataMallConfig::new(account_key)
    }));
    let lookup = Arc::new(SimplyGoClient::new(SimplyGoConfig {
        request_timeout,
        ..SimplyGoConfig::default()
    }));

    let config = PipelineConfig {
        run_date: Local::now().date_naive(),
        limit: args.limit,
        resume: args.resume,
        skip_enrichment: args.skip_enrichment,
        scheduler: SchedulerConfig {
            concurrency: args.workers,
            batch_size: args.batch_size,
            lookup_timeout: request_timeout,
            ..SchedulerConfig::default()
        },
    };

    let pipeline = Pipeline::new(source, lookup, store, config, shutdown);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;
    let report = rt.block_on(async move { pipeline.run().await })?;

    print_run_summary(&report);
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    let summary = &report.summary;
    println!();
    println!("{}", "Run summary".bold());
    println!(
        "  {} catalog: {} stops now, {} before",
        "→".cyan(),
        summary.total_current,
        summary.total_previous
    );
    println!(
        "  {} changes: {} new, {} removed, {} renamed",
        "→".cyan(),
        summary.new_count,
        summary.removed_count,
        summary.name_changed_count
    );
    println!(
        "  {} lookups: {} succeeded, {} failed",
        "→".cyan(),
        summary.enrichment_success_count,
        summary.enrichment_failure_count
    );
    let rate = if summary.total_current == 0 {
        0.0
    } else {
        summary.enriched_count as f64 / summary.total_current as f64 * 100.0
    };
    println!(
        "  {} corrections applied: {} ({rate:.1}% of catalog)",
        "→".cyan(),
        summary.enriched_count
    );
    println!(
        "  {} final table: {}",
        "→".cyan(),
        report.final_table.stable.display()
    );

    if report.interrupted {
        println!(
            "  {} interrupted: progress checkpointed, rerun with --resume to finish",
            "!".yellow()
        );
    } else {
        println!("  {} complete", "✓".green());
    }
}

// ============================================================================
// diff
// ============================================================================

fn cmd_diff(previous: &Path, current: &Path, out: Option<&Path>) -> Result<()> {
    let previous_snapshot = read_snapshot_table(previous, date_label(previous))
        .with_context(|| format!("failed to read {}", previous.display()))?;
    let current_snapshot = read_snapshot_table(current, date_label(current))
        .with_context(|| format!("failed to read {}", current.display()))?;

    let report = diff_snapshots(&previous_snapshot, &current_snapshot);

    println!("{}", "Snapshot diff".bold());
    println!(
        "  {} previous: {} stops ({})",
        "→".cyan(),
        previous_snapshot.len(),
        previous.display()
    );
    println!(
        "  {} current:  {} stops ({})",
        "→".cyan(),
        current_snapshot.len(),
        current.display()
    );
    println!(
        "  {} {} new, {} removed, {} renamed, {} unchanged (net {:+})",
        "→".cyan(),
        report.new.len(),
        report.removed.len(),
        report.name_changed.len(),
        report.unchanged.len(),
        report.net_delta()
    );
    if report.is_unchanged() {
        println!("  {} snapshots are identical", "✓".green());
    }

    if let Some(out) = out {
        write_change_report(out, &report)
            .with_context(|| format!("failed to write {}", out.display()))?;
        println!("  {} change report: {}", "→".cyan(), out.display());
    }

    Ok(())
}

/// Date label for an arbitrary snapshot file: the date in its name when it
/// follows the store's pattern, today otherwise. Only used for labeling;
/// the diff itself ignores it.
fn date_label(path: &Path) -> NaiveDate {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(snapshot_date_from_file_name)
        .unwrap_or_else(|| Local::now().date_naive())
}

// ============================================================================
// report
// ============================================================================

fn cmd_report(table: &Path) -> Result<()> {
    let records = read_final_table(table)
        .with_context(|| format!("failed to read {}", table.display()))?;

    let enriched = records
        .iter()
        .filter(|record| record.name_source == NameSource::Enriched)
        .count();
    let original = records.len() - enriched;
    let rate = if records.is_empty() {
        0.0
    } else {
        enriched as f64 / records.len() as f64 * 100.0
    };

    println!("{}", "Corrections report".bold());
    println!("  {} table: {}", "→".cyan(), table.display());
    println!("  {} records: {}", "→".cyan(), records.len());
    println!("  {} enriched: {enriched} ({rate:.1}%)", "→".cyan());
    println!("  {} original: {original}", "→".cyan());

    Ok(())
}
