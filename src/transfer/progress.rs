//! Transfer progress tracking
//!
//! Workers only touch atomic counters. The phase and the throughput window
//! sit behind `parking_lot::RwLock`s and are written by the migrator and by
//! observers: each [`TransferProgress::snapshot`] adds a throughput sample,
//! so the CLI's polling interval sets the sampling rate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use super::report::KeyOutcome;

/// Stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    /// Counting the source and preparing the destination
    Preparing,
    /// Listing source keys
    Enumerating,
    /// Workers fetching keys
    Fetching,
    /// Applying the write batch
    Flushing,
    /// Comparing key counts
    Verifying,
    /// Finished
    Complete,
    /// Aborted by a fatal error or cancellation
    Failed,
}

impl std::fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preparing => write!(f, "preparing"),
            Self::Enumerating => write!(f, "enumerating"),
            Self::Fetching => write!(f, "fetching"),
            Self::Flushing => write!(f, "flushing"),
            Self::Verifying => write!(f, "verifying"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A point-in-time view of progress.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    /// Current phase
    pub phase: TransferPhase,
    /// Keys to process
    pub total_keys: u64,
    /// Keys handed to the batcher
    pub fetched: u64,
    /// Keys skipped
    pub skipped: u64,
    /// Keys that failed to fetch
    pub failed: u64,
    /// Payload bytes fetched
    pub bytes: u64,
    /// Time since the tracker was created
    pub elapsed: Duration,
    /// Recent throughput
    pub keys_per_sec: f64,
    /// Estimated time until every key is processed
    pub eta: Option<Duration>,
    /// Completion, 0.0 to 100.0
    pub percentage: f64,
}

impl ProgressSnapshot {
    /// Keys processed in any state
    pub fn processed(&self) -> u64 {
        self.fetched + self.skipped + self.failed
    }
}

const THROUGHPUT_WINDOW: usize = 64;

/// Live progress of one run, shared between workers and observers.
pub struct TransferProgress {
    phase: RwLock<TransferPhase>,
    total_keys: AtomicU64,
    fetched: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
    start_time: Instant,
    /// (when, cumulative processed) samples, one per snapshot
    samples: RwLock<VecDeque<(Instant, u64)>>,
}

impl TransferProgress {
    /// Create a tracker. The clock starts immediately.
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(TransferPhase::Preparing),
            total_keys: AtomicU64::new(0),
            fetched: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            start_time: Instant::now(),
            samples: RwLock::new(VecDeque::with_capacity(THROUGHPUT_WINDOW)),
        }
    }

    /// Move to a new phase
    pub fn set_phase(&self, phase: TransferPhase) {
        *self.phase.write() = phase;
    }

    /// Current phase
    pub fn phase(&self) -> TransferPhase {
        *self.phase.read()
    }

    /// Set the number of keys to process
    pub fn set_total(&self, total: u64) {
        self.total_keys.store(total, Ordering::Relaxed);
    }

    /// Account for one finished key
    pub fn record(&self, outcome: &KeyOutcome) {
        match outcome {
            KeyOutcome::Fetched { bytes, .. } => {
                self.fetched.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(*bytes, Ordering::Relaxed);
            }
            KeyOutcome::Skipped(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            KeyOutcome::Failed(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn sample(&self, processed: u64) {
        let mut samples = self.samples.write();
        samples.push_back((Instant::now(), processed));
        if samples.len() > THROUGHPUT_WINDOW {
            samples.pop_front();
        }
    }

    fn processed(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
            + self.skipped.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
    }

    /// Keys per second across the snapshots taken so far (last 64)
    pub fn throughput(&self) -> f64 {
        let samples = self.samples.read();
        let (Some(first), Some(last)) = (samples.front(), samples.back()) else {
            return 0.0;
        };
        let secs = last.0.duration_since(first.0).as_secs_f64();
        if secs < f64::EPSILON {
            return 0.0;
        }
        last.1.saturating_sub(first.1) as f64 / secs
    }

    /// Take a snapshot and record a throughput sample
    pub fn snapshot(&self) -> ProgressSnapshot {
        let total_keys = self.total_keys.load(Ordering::Relaxed);
        let processed = self.processed();
        self.sample(processed);
        let keys_per_sec = self.throughput();

        let percentage = if total_keys == 0 {
            0.0
        } else {
            (processed as f64 / total_keys as f64 * 100.0).min(100.0)
        };
        let eta = if processed >= total_keys {
            Some(Duration::ZERO)
        } else if keys_per_sec < f64::EPSILON {
            None
        } else {
            Some(Duration::from_secs_f64(
                (total_keys - processed) as f64 / keys_per_sec,
            ))
        };

        ProgressSnapshot {
            phase: self.phase(),
            total_keys,
            fetched: self.fetched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            elapsed: self.start_time.elapsed(),
            keys_per_sec,
            eta,
            percentage,
        }
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}
