//! Write batcher
//!
//! Workers submit [`WriteIntent`]s concurrently; the batcher accumulates them
//! behind a `parking_lot::Mutex` and applies them to the destination in one
//! [`Endpoint::restore_batch`] call. Each key is accepted at most once.
//! `flush` consumes the batcher, so it runs exactly once and nothing can be
//! submitted afterwards.

use std::collections::HashSet;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

use super::endpoint::{Endpoint, EndpointResult, FlushOutcome, Key, WriteIntent};

#[derive(Default)]
struct Pending {
    intents: Vec<WriteIntent>,
    keys: HashSet<Key>,
    bytes: u64,
}

/// Accumulates write intents for a single flush.
#[derive(Default)]
pub struct WriteBatcher {
    pending: Mutex<Pending>,
}

impl WriteBatcher {
    /// Create an empty batcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an intent. Returns `false` if the key was already submitted,
    /// in which case the intent is dropped.
    pub fn submit(&self, intent: WriteIntent) -> bool {
        let mut pending = self.pending.lock();
        if !pending.keys.insert(intent.key.clone()) {
            return false;
        }
        pending.bytes += intent.value.len() as u64;
        pending.intents.push(intent);
        true
    }

    /// Number of accepted intents
    pub fn len(&self) -> usize {
        self.pending.lock().intents.len()
    }

    /// Whether nothing has been accepted
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes accepted so far
    pub fn pending_bytes(&self) -> u64 {
        self.pending.lock().bytes
    }

    /// Apply every accepted intent to `destination` with replace semantics.
    pub async fn flush(self, destination: &dyn Endpoint) -> EndpointResult<FlushOutcome> {
        let Pending { intents, bytes, .. } = self.pending.into_inner();
        let count = intents.len();
        let started = Instant::now();

        let outcome = destination.restore_batch(intents).await?;

        info!(
            endpoint = destination.name(),
            intents = count,
            applied = outcome.applied,
            rejected = outcome.rejected.len(),
            bytes,
            elapsed = ?started.elapsed(),
            "Flushed write batch"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::transfer::{MemoryEndpoint, SerializedValue, TimeToLive};

    fn intent(key: &str, value: &'static str) -> WriteIntent {
        WriteIntent {
            key: Key::from(key.to_string()),
            value: SerializedValue::new(Bytes::from_static(value.as_bytes())),
            ttl: TimeToLive::Persistent,
        }
    }

    #[test]
    fn test_submit_rejects_duplicate_keys() {
        let batcher = WriteBatcher::new();
        assert!(batcher.submit(intent("a", "1")));
        assert!(!batcher.submit(intent("a", "2")));
        assert!(batcher.submit(intent("b", "22")));
        assert_eq!(batcher.len(), 2);
        assert_eq!(batcher.pending_bytes(), 3);
    }

    #[tokio::test]
    async fn test_flush_writes_everything() {
        let batcher = WriteBatcher::new();
        batcher.submit(intent("a", "1"));
        batcher.submit(intent("b", "2"));

        let destination = MemoryEndpoint::new("new");
        destination.insert("a", "stale", TimeToLive::Persistent);

        let outcome = batcher.flush(&destination).await.unwrap();
        assert_eq!(outcome.applied, 2);
        assert!(outcome.rejected.is_empty());
        assert_eq!(
            destination.get(&Key::from("a")).unwrap().0,
            Bytes::from_static(b"1")
        );
    }

    #[tokio::test]
    async fn test_flush_empty_batch() {
        let destination = MemoryEndpoint::new("new");
        let outcome = WriteBatcher::new().flush(&destination).await.unwrap();
        assert_eq!(outcome.applied, 0);
        assert!(destination.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submit() {
        let batcher = Arc::new(WriteBatcher::new());
        let mut set = tokio::task::JoinSet::new();

        for t in 0..8 {
            let batcher = batcher.clone();
            set.spawn(async move {
                let mut accepted = 0;
                // Every task submits the shared keys plus its own
                for i in 0..100 {
                    if batcher.submit(intent(&format!("shared:{}", i), "v")) {
                        accepted += 1;
                    }
                    if batcher.submit(intent(&format!("own:{}:{}", t, i), "v")) {
                        accepted += 1;
                    }
                }
                accepted
            });
        }

        let mut total = 0;
        while let Some(res) = set.join_next().await {
            total += res.unwrap();
        }
        assert_eq!(total, 100 + 8 * 100);
        assert_eq!(batcher.len(), 900);
    }
}
