//! Bounded worker pool
//!
//! A fixed number of tokio tasks pull keys from one shared queue. Each
//! worker fetches the key's value and TTL from the source and submits a
//! [`WriteIntent`] to the batcher. Workers keep private [`WorkerStats`] that
//! are merged only after every worker has been joined, so there is no shared
//! counter to race on.
//!
//! The queue is an `mpsc` channel whose receiver sits behind a
//! `tokio::sync::Mutex`; dropping the sender closes it once the producer
//! has queued every key. Cancellation stops the producer and makes each
//! worker exit before its next key.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, trace, warn};

use super::batcher::WriteBatcher;
use super::endpoint::{Endpoint, Key, TimeToLive, WriteIntent};
use super::progress::TransferProgress;
use super::report::{FailureStage, KeyFailure, KeyOutcome, SkipReason, WorkerStats};

/// Runs the fetch stage with bounded concurrency.
pub struct WorkerPool {
    workers: usize,
    queue_capacity: Option<usize>,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Create a pool with `workers` concurrent tasks (at least one)
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_capacity: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bound the task queue. By default it holds every key.
    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity.map(|c| c.max(1));
        self
    }

    /// Share a cancellation flag with the caller
    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Configured worker count
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every key, returning once all workers have exited.
    pub async fn run(
        &self,
        keys: Vec<Key>,
        source: Arc<dyn Endpoint>,
        batcher: Arc<WriteBatcher>,
        progress: Arc<TransferProgress>,
    ) -> WorkerStats {
        if keys.is_empty() {
            return WorkerStats::default();
        }

        let capacity = self.queue_capacity.unwrap_or(keys.len()).max(1);
        let spawned = self.workers.min(keys.len());
        let (tx, rx) = mpsc::channel::<Key>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let handles: Vec<_> = (0..spawned)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    rx.clone(),
                    source.clone(),
                    batcher.clone(),
                    progress.clone(),
                    self.cancelled.clone(),
                ))
            })
            .collect();
        // Workers hold the only receivers; if they all die, send fails.
        drop(rx);

        debug!(
            workers = spawned,
            queue_capacity = capacity,
            keys = keys.len(),
            "Worker pool started"
        );

        for key in keys {
            if self.cancelled.load(Ordering::Relaxed) {
                warn!("Cancelled, no further keys dispatched");
                break;
            }
            if tx.send(key).await.is_err() {
                error!("All workers exited before the queue was drained");
                break;
            }
        }
        drop(tx);

        let mut total = WorkerStats::default();
        for (id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(stats) => total.merge(stats),
                Err(e) => {
                    error!(worker = id, error = %e, "Worker terminated abnormally");
                    total.aborted_workers += 1;
                }
            }
        }

        debug!(
            fetched = total.fetched,
            skipped = total.skipped,
            failed = total.failed,
            "Worker pool drained"
        );
        total
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Key>>>,
    source: Arc<dyn Endpoint>,
    batcher: Arc<WriteBatcher>,
    progress: Arc<TransferProgress>,
    cancelled: Arc<AtomicBool>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    loop {
        if cancelled.load(Ordering::Relaxed) {
            break;
        }
        let next = queue.lock().await.recv().await;
        let Some(key) = next else {
            break;
        };

        let started = Instant::now();
        let outcome = fetch_key(&*source, &batcher, key).await;
        progress.record(&outcome);
        stats.record(outcome, started.elapsed());
    }

    trace!(worker = id, processed = stats.processed(), "Worker exiting");
    stats
}

/// Fetch one key and hand it to the batcher.
///
/// A key that vanished or expired at any point during the fetch is skipped.
/// A TTL lookup that fails for any other reason keeps the key, without
/// expiry.
pub async fn fetch_key(source: &dyn Endpoint, batcher: &WriteBatcher, key: Key) -> KeyOutcome {
    match source.exists(&key).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(key = %key, "Key vanished before fetch");
            return KeyOutcome::Skipped(SkipReason::Missing);
        }
        Err(e) => {
            warn!(key = %key, error = %e, "EXISTS failed");
            return KeyOutcome::Failed(KeyFailure {
                key,
                stage: FailureStage::Exists,
                reason: e.to_string(),
            });
        }
    }

    let value = match source.dump(&key).await {
        Ok(value) => value,
        Err(e) if e.is_not_found() => {
            debug!(key = %key, "Key vanished during fetch");
            return KeyOutcome::Skipped(SkipReason::Missing);
        }
        Err(e) => {
            warn!(key = %key, error = %e, "DUMP failed");
            return KeyOutcome::Failed(KeyFailure {
                key,
                stage: FailureStage::Dump,
                reason: e.to_string(),
            });
        }
    };

    let (ttl, ttl_fallback) = match source.ttl(&key).await {
        Ok(ttl) => (ttl, false),
        Err(e) if e.is_not_found() => {
            debug!(key = %key, "Key expired during fetch");
            return KeyOutcome::Skipped(SkipReason::Missing);
        }
        Err(e) => {
            warn!(key = %key, error = %e, "PTTL failed, writing without expiry");
            (TimeToLive::Persistent, true)
        }
    };

    let bytes = value.len() as u64;
    if batcher.submit(WriteIntent { key, value, ttl }) {
        KeyOutcome::Fetched {
            bytes,
            ttl_fallback,
        }
    } else {
        KeyOutcome::Skipped(SkipReason::Duplicate)
    }
}
