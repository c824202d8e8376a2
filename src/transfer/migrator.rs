//! Transfer orchestration
//!
//! [`Migrator::run`] drives one complete pass: count, clear, enumerate,
//! fetch, flush, reconcile. Fatal errors abort the run; everything else is
//! folded into the [`TransferReport`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use keyshift_core::config::TransferSettings;

use super::batcher::WriteBatcher;
use super::endpoint::Endpoint;
use super::enumerator::KeyEnumerator;
use super::pool::WorkerPool;
use super::progress::{TransferPhase, TransferProgress};
use super::report::{ReconciliationOutcome, TransferReport};
use super::verifier::ReconciliationVerifier;
use super::{Result, TransferError};

/// Copies a keyspace from one endpoint to another.
pub struct Migrator {
    run_id: Uuid,
    source: Arc<dyn Endpoint>,
    destination: Arc<dyn Endpoint>,
    settings: TransferSettings,
    progress: Arc<TransferProgress>,
    cancelled: Arc<AtomicBool>,
}

impl Migrator {
    /// Create a migrator. Nothing happens until [`run`](Self::run).
    pub fn new(
        source: Arc<dyn Endpoint>,
        destination: Arc<dyn Endpoint>,
        settings: TransferSettings,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source,
            destination,
            settings,
            progress: Arc::new(TransferProgress::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identifier attached to logs and the report
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Live progress, for display
    pub fn progress(&self) -> Arc<TransferProgress> {
        self.progress.clone()
    }

    /// Request cancellation. Workers stop before their next key and the
    /// run returns [`TransferError::Cancelled`] without flushing.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Handle for cancelling from another task
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Run the transfer to completion.
    ///
    /// Returns `Ok` whenever the pipeline finished, including when the final
    /// counts differ; check [`TransferReport::is_success`].
    pub async fn run(&self) -> Result<TransferReport> {
        let span = info_span!("transfer", run_id = %self.run_id);
        let result = self.execute().instrument(span).await;
        match &result {
            Ok(_) => self.progress.set_phase(TransferPhase::Complete),
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "Transfer aborted");
                self.progress.set_phase(TransferPhase::Failed);
            }
        }
        result
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn execute(&self) -> Result<TransferReport> {
        let started = Instant::now();
        let mut warnings = Vec::new();

        // ── Prepare ──
        self.progress.set_phase(TransferPhase::Preparing);
        let initial_source_count = self.source.count().await.map_err(|e| {
            TransferError::SourceUnavailable(format!("{}: {}", self.source.name(), e))
        })?;
        info!(old = initial_source_count, "Source key count");

        self.destination.ping().await.map_err(|e| {
            TransferError::DestinationUnavailable(format!("{}: {}", self.destination.name(), e))
        })?;
        if let Err(e) = self.destination.clear().await {
            warn!(error = %e, "Clearing destination failed, continuing");
            warnings.push(format!("clearing {} failed: {}", self.destination.name(), e));
        }
        self.check_cancelled()?;

        // ── Enumerate ──
        self.progress.set_phase(TransferPhase::Enumerating);
        let keys = KeyEnumerator::from_settings(&self.settings)
            .enumerate(self.source.as_ref())
            .await
            .map_err(|e| TransferError::Enumeration(e.to_string()))?;
        let enumerated = keys.len() as u64;
        self.progress.set_total(enumerated);
        if self.settings.pattern != "*" {
            warn!(
                pattern = %self.settings.pattern,
                "Filtered transfer, key counts cover the whole database"
            );
            warnings.push(format!(
                "pattern '{}' filters the copy but reconciliation compares whole-database counts",
                self.settings.pattern
            ));
        }
        self.check_cancelled()?;

        // ── Fetch ──
        self.progress.set_phase(TransferPhase::Fetching);
        let batcher = Arc::new(WriteBatcher::new());
        let stats = WorkerPool::new(self.settings.workers)
            .with_queue_capacity(self.settings.queue_capacity)
            .with_cancellation(self.cancelled.clone())
            .run(
                keys,
                self.source.clone(),
                batcher.clone(),
                self.progress.clone(),
            )
            .await;
        self.check_cancelled()?;

        if stats.aborted_workers > 0 {
            warnings.push(format!(
                "{} worker(s) terminated abnormally",
                stats.aborted_workers
            ));
        }
        if stats.ttl_fallbacks > 0 {
            warnings.push(format!(
                "{} key(s) written without expiry because their TTL could not be read",
                stats.ttl_fallbacks
            ));
        }
        info!(
            fetched = stats.fetched,
            skipped = stats.skipped,
            failed = stats.failed,
            bytes = stats.bytes,
            fetch_time = ?stats.fetch_time,
            "Fetch complete"
        );

        // ── Flush ──
        self.progress.set_phase(TransferPhase::Flushing);
        let batcher = Arc::try_unwrap(batcher).map_err(|_| {
            TransferError::Flush("write batcher still shared after workers exited".to_string())
        })?;
        let flush_started = Instant::now();
        let outcome = batcher
            .flush(self.destination.as_ref())
            .await
            .map_err(|e| TransferError::Flush(e.to_string()))?;
        let flush_time = flush_started.elapsed();

        // ── Reconcile ──
        self.progress.set_phase(TransferPhase::Verifying);
        let reconciliation =
            ReconciliationVerifier::reconcile(self.source.as_ref(), self.destination.as_ref())
                .await?;

        let rejected = outcome.rejected.len() as u64;
        let mut failures = stats.failures;
        failures.extend(outcome.rejected);

        let report = TransferReport {
            run_id: self.run_id,
            initial_source_count,
            enumerated,
            fetched: stats.fetched,
            skipped: stats.skipped,
            failed: stats.failed,
            rejected,
            applied: outcome.applied,
            ttl_fallbacks: stats.ttl_fallbacks,
            bytes_transferred: stats.bytes,
            fetch_time: stats.fetch_time,
            flush_time,
            elapsed: started.elapsed(),
            reconciliation: ReconciliationOutcome::from(reconciliation),
            failures,
            warnings,
        };

        if report.is_success() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        Ok(report)
    }
}
