//! keyshift - copy every key from one Redis-compatible instance to another
//!
//! Clears the new instance, transfers every key of the old instance with
//! `DUMP`/`RESTORE` preserving TTLs, and compares the two key counts.
//!
//! Exit codes: `0` counts match, `1` fatal error, `3` count mismatch.

mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use tracing::{info, warn};

use keyshift::config::{EnumerationStrategy, LogFormat};
use keyshift::telemetry;
use keyshift::transfer::{Migrator, RespEndpoint, RespOptions, TransferError};
use keyshift::Config;

const EXIT_SUCCESS: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_MISMATCH: u8 = 3;

/// keyshift - one-shot Redis keyspace migration
#[derive(Parser, Debug)]
#[command(name = "keyshift")]
#[command(author, version, about = "Copy every key from an old Redis instance to a new one")]
struct Args {
    /// Source instance, e.g. redis://:pass@old-host:6379
    #[arg(long, visible_alias = "source", env = "KEYSHIFT_OLD")]
    old: Option<String>,

    /// Destination instance; it is cleared before the copy
    #[arg(long, visible_alias = "destination", env = "KEYSHIFT_NEW")]
    new: Option<String>,

    /// TOML configuration file
    #[arg(short, long, env = "KEYSHIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Only transfer keys matching this glob pattern. Reconciliation still
    /// compares whole-database counts, so a pattern other than `*` reports a
    /// mismatch (exit 3) unless every source key matches.
    #[arg(long)]
    pattern: Option<String>,

    /// How to list source keys
    #[arg(long, value_enum)]
    enumeration: Option<EnumerationArg>,

    /// Bound on queued keys (default: all keys)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Log level or filter directive
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Do not draw the progress line
    #[arg(long)]
    no_progress: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EnumerationArg {
    /// Single KEYS call
    Keys,
    /// Cursor iteration with SCAN
    Scan,
}

impl From<EnumerationArg> for EnumerationStrategy {
    fn from(arg: EnumerationArg) -> Self {
        match arg {
            EnumerationArg::Keys => EnumerationStrategy::Keys,
            EnumerationArg::Scan => EnumerationStrategy::Scan,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let result = run(args).await;
    if let Err(e) = &result {
        eprintln!("{} {:#}", "error:".red().bold(), e);
    }
    ExitCode::from(exit_status(&result))
}

/// 0 when the counts matched, 3 on a count mismatch, 1 on a fatal error.
fn exit_status(result: &anyhow::Result<bool>) -> u8 {
    match result {
        Ok(true) => EXIT_SUCCESS,
        Ok(false) => EXIT_MISMATCH,
        Err(_) => EXIT_FATAL,
    }
}

/// Returns whether the key counts matched.
async fn run(args: Args) -> anyhow::Result<bool> {
    let config = build_config(&args)?;
    telemetry::init_logging(&config.logging)?;
    config.validate()?;

    let old_addr = config.source.addr("source")?;
    let new_addr = config.destination.addr("destination")?;
    info!(
        old = %old_addr,
        new = %new_addr,
        workers = config.transfer.workers,
        enumeration = ?config.transfer.enumeration,
        "Starting keyspace transfer"
    );

    let source_options =
        RespOptions::from_config(&config.source, &config.timeouts, &config.transfer);
    let source = RespEndpoint::connect("old", old_addr, source_options)
        .await
        .map_err(|e| TransferError::SourceUnavailable(e.to_string()))?;

    let destination_options =
        RespOptions::from_config(&config.destination, &config.timeouts, &config.transfer);
    let destination = RespEndpoint::connect("new", new_addr, destination_options)
        .await
        .map_err(|e| TransferError::DestinationUnavailable(e.to_string()))?;

    let migrator = Migrator::new(
        Arc::new(source),
        Arc::new(destination),
        config.transfer.clone(),
    );

    let cancel = migrator.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling transfer");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let ticker = (!args.no_progress && !args.json && output::stderr_is_terminal())
        .then(|| output::spawn_progress(migrator.progress()));

    let result = migrator.run().await;

    if let Some(ticker) = ticker {
        ticker.abort();
        output::clear_progress_line();
    }

    let report = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_report(&report);
    }

    Ok(report.is_success())
}

/// Load the config file, if any, and apply command-line overrides.
fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(old) = &args.old {
        config.source.url = Some(old.clone());
    }
    if let Some(new) = &args.new {
        config.destination.url = Some(new.clone());
    }
    if let Some(workers) = args.workers {
        config.transfer.workers = workers;
    }
    if let Some(pattern) = &args.pattern {
        config.transfer.pattern = pattern.clone();
    }
    if let Some(enumeration) = args.enumeration {
        config.transfer.enumeration = enumeration.into();
    }
    if let Some(capacity) = args.queue_capacity {
        config.transfer.queue_capacity = Some(capacity);
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = args.log_format {
        config.logging.format = format.into();
    }

    Ok(config)
}
