//! Source key enumeration
//!
//! Produces the finite, de-duplicated list of keys to transfer, either from
//! a single `KEYS` call or by walking a `SCAN` cursor to completion.

use std::collections::HashSet;

use tracing::{debug, info};

use keyshift_core::config::{EnumerationStrategy, TransferSettings};

use super::endpoint::{Endpoint, EndpointResult, Key};

/// Lists the keys to transfer from a source endpoint.
#[derive(Debug, Clone)]
pub struct KeyEnumerator {
    strategy: EnumerationStrategy,
    pattern: String,
    scan_count: u64,
}

impl KeyEnumerator {
    /// Create an enumerator
    pub fn new(strategy: EnumerationStrategy, pattern: impl Into<String>, scan_count: u64) -> Self {
        Self {
            strategy,
            pattern: pattern.into(),
            scan_count: scan_count.max(1),
        }
    }

    /// Build from transfer settings
    pub fn from_settings(settings: &TransferSettings) -> Self {
        Self::new(settings.enumeration, settings.pattern.clone(), settings.scan_count)
    }

    /// Return every key matching the pattern, each exactly once, in first
    /// seen order. Keys created during enumeration may or may not appear.
    pub async fn enumerate(&self, source: &dyn Endpoint) -> EndpointResult<Vec<Key>> {
        let raw = match self.strategy {
            EnumerationStrategy::Keys => source.list_keys(&self.pattern).await?,
            EnumerationStrategy::Scan => self.scan_all(source).await?,
        };

        let reported = raw.len();
        let keys = dedup(raw);
        info!(
            strategy = ?self.strategy,
            pattern = %self.pattern,
            keys = keys.len(),
            duplicates = reported - keys.len(),
            "Enumerated source keys"
        );
        Ok(keys)
    }

    async fn scan_all(&self, source: &dyn Endpoint) -> EndpointResult<Vec<Key>> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        let mut steps = 0u64;
        loop {
            let (next, batch) = source
                .scan_keys(cursor, &self.pattern, self.scan_count)
                .await?;
            keys.extend(batch);
            steps += 1;
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(steps, keys = keys.len(), "SCAN complete");
        Ok(keys)
    }
}

fn dedup(keys: Vec<Key>) -> Vec<Key> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}
