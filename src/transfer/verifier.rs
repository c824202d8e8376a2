//! Count reconciliation
//!
//! After the flush, both stores are asked for their key count and the two
//! numbers are compared. This is a count check only: values are never
//! compared, so a lost key hidden by an unrelated extra key goes unnoticed.

use tracing::{info, warn};

use super::endpoint::Endpoint;
use super::TransferError;

/// Key counts of both stores, read after the flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// `DBSIZE` on the source
    pub source_count: u64,
    /// `DBSIZE` on the destination
    pub destination_count: u64,
}

impl Reconciliation {
    /// True when the counts are equal
    pub fn is_consistent(&self) -> bool {
        self.source_count == self.destination_count
    }

    /// Signed gap, positive when the destination is missing keys
    pub fn difference(&self) -> i64 {
        self.source_count as i64 - self.destination_count as i64
    }
}

/// Compares source and destination key counts.
pub struct ReconciliationVerifier;

impl ReconciliationVerifier {
    /// Query both counts concurrently and compare them.
    ///
    /// A failed count query is an error; a mismatch is not.
    pub async fn reconcile(
        source: &dyn Endpoint,
        destination: &dyn Endpoint,
    ) -> Result<Reconciliation, TransferError> {
        let (source_count, destination_count) = tokio::join!(source.count(), destination.count());

        let source_count = source_count.map_err(|e| {
            TransferError::Verification(format!("counting {} failed: {}", source.name(), e))
        })?;
        let destination_count = destination_count.map_err(|e| {
            TransferError::Verification(format!("counting {} failed: {}", destination.name(), e))
        })?;

        let reconciliation = Reconciliation {
            source_count,
            destination_count,
        };

        if reconciliation.is_consistent() {
            info!(
                old = source_count,
                new = destination_count,
                "Key counts match"
            );
        } else {
            warn!(
                old = source_count,
                new = destination_count,
                difference = reconciliation.difference(),
                "Key counts differ"
            );
        }

        Ok(reconciliation)
    }
}
