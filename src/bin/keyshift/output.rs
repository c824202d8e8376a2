//! Terminal output: progress line and final report

use std::io::{IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::task::JoinHandle;

use keyshift::transfer::{ProgressSnapshot, ReconciliationOutcome, TransferProgress, TransferReport};

const BAR_WIDTH: usize = 30;
const TICK: Duration = Duration::from_millis(250);
const MAX_LISTED_FAILURES: usize = 20;

pub fn stderr_is_terminal() -> bool {
    std::io::stderr().is_terminal()
}

/// Redraw the progress line on stderr until aborted.
pub fn spawn_progress(progress: Arc<TransferProgress>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        loop {
            interval.tick().await;
            let line = render_progress(&progress.snapshot());
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\r\x1b[2K{}", line);
            let _ = stderr.flush();
        }
    })
}

pub fn clear_progress_line() {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\r\x1b[2K");
    let _ = stderr.flush();
}

fn render_progress(snap: &ProgressSnapshot) -> String {
    let filled = ((snap.percentage / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    let bar = format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled)
    );
    let eta = snap
        .eta
        .map(format_duration)
        .unwrap_or_else(|| "--".to_string());

    format!(
        "{} [{}] {:>5.1}% {}/{} keys  {:.0} keys/s  {}  eta {}",
        format!("{:<11}", snap.phase.to_string()).cyan(),
        bar,
        snap.percentage,
        snap.processed(),
        snap.total_keys,
        snap.keys_per_sec,
        format_bytes(snap.bytes),
        eta,
    )
}

pub fn print_report(report: &TransferReport) {
    println!();
    match report.reconciliation {
        ReconciliationOutcome::Match { count } => println!(
            "{} {}",
            "✓".green().bold(),
            format!("Transfer verified: {} keys on both instances", count)
                .green()
                .bold()
        ),
        ReconciliationOutcome::Mismatch {
            source,
            destination,
        } => println!(
            "{} {}",
            "✗".red().bold(),
            format!(
                "Key count mismatch: old has {}, new has {}",
                source, destination
            )
            .red()
            .bold()
        ),
    }
    println!();

    let (old_count, new_count) = report.counts();
    println!("{}", "Transfer Summary".bold().underline());
    println!("  Run ID:          {}", report.run_id.to_string().dimmed());
    println!("  Old count:       {}", old_count);
    println!("  New count:       {}", new_count);
    println!("  Enumerated:      {}", report.enumerated);
    println!("  Fetched:         {}", report.fetched);
    println!("  Skipped:         {}", report.skipped);
    println!("  Failed:          {}", colored_count(report.failed));
    println!("  Rejected:        {}", colored_count(report.rejected));
    println!("  Data:            {}", format_bytes(report.bytes_transferred));
    println!("  Fetch time:      {}", format_duration(report.fetch_time));
    println!("  Flush time:      {}", format_duration(report.flush_time));
    println!("  Total time:      {}", format_duration(report.elapsed));
    println!();

    if !report.warnings.is_empty() {
        println!("{}", "Warnings".bold().underline());
        for warning in &report.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
        println!();
    }

    if !report.failures.is_empty() {
        println!("{}", "Failed Keys".bold().underline());
        for failure in report.failures.iter().take(MAX_LISTED_FAILURES) {
            println!(
                "  {} {} [{}] {}",
                "✗".red(),
                failure.key,
                failure.stage.to_string().dimmed(),
                failure.reason.dimmed()
            );
        }
        if report.failures.len() > MAX_LISTED_FAILURES {
            println!(
                "  {}",
                format!(
                    "... and {} more",
                    report.failures.len() - MAX_LISTED_FAILURES
                )
                .dimmed()
            );
        }
        println!();
    }
}

fn colored_count(n: u64) -> String {
    if n == 0 {
        n.to_string()
    } else {
        n.to_string().red().to_string()
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs >= 1 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}ms", d.as_millis())
    }
}
