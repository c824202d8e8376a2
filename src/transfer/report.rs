//! Transfer outcome types
//!
//! Per-key outcomes produced by workers, per-worker statistics reduced after
//! the pool drains, and the final [`TransferReport`].

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use super::endpoint::Key;
use super::verifier::Reconciliation;

/// Where in the pipeline a key was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// `EXISTS` failed
    Exists,
    /// `DUMP` failed
    Dump,
    /// The destination rejected the `RESTORE`
    Restore,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exists => write!(f, "exists"),
            Self::Dump => write!(f, "dump"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// A single key that did not make it to the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyFailure {
    /// The key
    pub key: Key,
    /// Stage that failed
    pub stage: FailureStage,
    /// Error text from the endpoint
    pub reason: String,
}

/// Why a key was skipped without counting as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Deleted or expired between enumeration and fetch
    Missing,
    /// Already submitted to the batcher
    Duplicate,
}

/// What happened to one key inside a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Fetched and handed to the batcher
    Fetched {
        /// Dump payload size
        bytes: u64,
        /// The TTL lookup failed and the key was submitted without expiry
        ttl_fallback: bool,
    },
    /// Nothing to transfer
    Skipped(SkipReason),
    /// A fetch error
    Failed(KeyFailure),
}

/// Counters one worker accumulates. Merged after every worker has finished.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Keys handed to the batcher
    pub fetched: u64,
    /// Keys that vanished or were duplicates
    pub skipped: u64,
    /// Keys whose fetch failed
    pub failed: u64,
    /// Keys submitted without expiry because `PTTL` failed
    pub ttl_fallbacks: u64,
    /// Dump payload bytes fetched
    pub bytes: u64,
    /// Time spent inside fetch calls
    pub fetch_time: Duration,
    /// Failed keys, in the order this worker saw them
    pub failures: Vec<KeyFailure>,
    /// Workers that terminated abnormally
    pub aborted_workers: u64,
}

impl WorkerStats {
    /// Account for one key
    pub fn record(&mut self, outcome: KeyOutcome, elapsed: Duration) {
        self.fetch_time += elapsed;
        match outcome {
            KeyOutcome::Fetched {
                bytes,
                ttl_fallback,
            } => {
                self.fetched += 1;
                self.bytes += bytes;
                if ttl_fallback {
                    self.ttl_fallbacks += 1;
                }
            }
            KeyOutcome::Skipped(_) => self.skipped += 1,
            KeyOutcome::Failed(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            }
        }
    }

    /// Fold another worker's counters into this one
    pub fn merge(&mut self, other: WorkerStats) {
        self.fetched += other.fetched;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.ttl_fallbacks += other.ttl_fallbacks;
        self.bytes += other.bytes;
        self.fetch_time += other.fetch_time;
        self.failures.extend(other.failures);
        self.aborted_workers += other.aborted_workers;
    }

    /// Keys the workers finished with, in any state
    pub fn processed(&self) -> u64 {
        self.fetched + self.skipped + self.failed
    }
}

/// Count comparison verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    /// Both stores report the same key count
    Match {
        /// The shared count
        count: u64,
    },
    /// The counts differ
    Mismatch {
        /// Source key count
        source: u64,
        /// Destination key count
        destination: u64,
    },
}

impl From<Reconciliation> for ReconciliationOutcome {
    fn from(r: Reconciliation) -> Self {
        if r.is_consistent() {
            ReconciliationOutcome::Match {
                count: r.source_count,
            }
        } else {
            ReconciliationOutcome::Mismatch {
                source: r.source_count,
                destination: r.destination_count,
            }
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    /// Unique run identifier, also attached to log lines
    pub run_id: Uuid,
    /// Source count taken before the destination was cleared
    pub initial_source_count: u64,
    /// Keys produced by enumeration, after de-duplication
    pub enumerated: u64,
    /// Keys handed to the batcher
    pub fetched: u64,
    /// Keys skipped (vanished or duplicate)
    pub skipped: u64,
    /// Keys whose fetch failed
    pub failed: u64,
    /// Keys the destination rejected during flush
    pub rejected: u64,
    /// Writes the destination accepted
    pub applied: u64,
    /// Keys written without expiry because their TTL could not be read
    pub ttl_fallbacks: u64,
    /// Dump payload bytes moved
    pub bytes_transferred: u64,
    /// Cumulative time spent in fetch calls across all workers
    pub fetch_time: Duration,
    /// Wall time of the flush
    pub flush_time: Duration,
    /// Wall time of the whole run
    pub elapsed: Duration,
    /// Post-flush count comparison
    pub reconciliation: ReconciliationOutcome,
    /// Every key that did not arrive, with the reason
    pub failures: Vec<KeyFailure>,
    /// Non-fatal problems
    pub warnings: Vec<String>,
}

impl TransferReport {
    /// True when the counts matched
    pub fn is_success(&self) -> bool {
        matches!(self.reconciliation, ReconciliationOutcome::Match { .. })
    }

    /// Source and destination counts from reconciliation
    pub fn counts(&self) -> (u64, u64) {
        match self.reconciliation {
            ReconciliationOutcome::Match { count } => (count, count),
            ReconciliationOutcome::Mismatch {
                source,
                destination,
            } => (source, destination),
        }
    }

    /// One-paragraph human summary, also logged at the end of a run
    pub fn summary(&self) -> String {
        let (source, destination) = self.counts();
        let verdict = if self.is_success() {
            "counts match"
        } else {
            "COUNT MISMATCH"
        };
        format!(
            "{}: old={} new={} | enumerated={} fetched={} skipped={} failed={} rejected={} | \
             fetch={:.2?} flush={:.2?} total={:.2?}",
            verdict,
            source,
            destination,
            self.enumerated,
            self.fetched,
            self.skipped,
            self.failed,
            self.rejected,
            self.fetch_time,
            self.flush_time,
            self.elapsed,
        )
    }
}
