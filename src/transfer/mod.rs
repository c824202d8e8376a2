//! Keyspace transfer engine
//!
//! One-shot copy of every key from a source store to a destination store,
//! followed by a key-count reconciliation.
//!
//! # Pipeline
//!
//! 1. Count the source (`DBSIZE`); an unreachable source aborts the run.
//! 2. Clear the destination (`FLUSHALL`); a failure is only a warning.
//! 3. Enumerate source keys with `KEYS` or `SCAN`.
//! 4. A bounded [`WorkerPool`] fetches each key's dump payload and TTL and
//!    submits it to the [`WriteBatcher`].
//! 5. The batch is flushed to the destination exactly once.
//! 6. [`ReconciliationVerifier`] compares both key counts.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use keyshift::transfer::{Migrator, RespEndpoint, RespOptions};
//!
//! let old = RespEndpoint::connect("old", "old-host:6379".parse()?, RespOptions::default()).await?;
//! let new = RespEndpoint::connect("new", "new-host:6379".parse()?, RespOptions::default()).await?;
//!
//! let report = Migrator::new(Arc::new(old), Arc::new(new), Default::default())
//!     .run()
//!     .await?;
//! println!("{}", report.summary());
//! ```

pub mod batcher;
pub mod endpoint;
pub mod enumerator;
pub mod memory;
pub mod migrator;
pub mod pool;
pub mod progress;
pub mod report;
pub mod resp;
pub mod verifier;

pub use batcher::WriteBatcher;
pub use endpoint::{
    Endpoint, EndpointError, EndpointResult, FlushOutcome, Key, SerializedValue, TimeToLive,
    WriteIntent,
};
pub use enumerator::KeyEnumerator;
pub use memory::MemoryEndpoint;
pub use migrator::Migrator;
pub use pool::WorkerPool;
pub use progress::{ProgressSnapshot, TransferPhase, TransferProgress};
pub use report::{
    FailureStage, KeyFailure, KeyOutcome, ReconciliationOutcome, SkipReason, TransferReport,
    WorkerStats,
};
pub use resp::{RespEndpoint, RespOptions};
pub use verifier::{Reconciliation, ReconciliationVerifier};

use keyshift_core::KeyshiftError;

/// Fatal transfer errors. A count mismatch is not one of these; it is
/// reported through [`TransferReport::reconciliation`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    /// The source could not be reached or counted
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The destination could not be reached
    #[error("destination unavailable: {0}")]
    DestinationUnavailable(String),

    /// Listing source keys failed
    #[error("enumeration failed: {0}")]
    Enumeration(String),

    /// Applying the write batch failed
    #[error("flush failed: {0}")]
    Flush(String),

    /// A post-flush count query failed
    #[error("verification failed: {0}")]
    Verification(String),

    /// Invalid settings
    #[error("configuration error: {0}")]
    Config(String),

    /// The run was cancelled
    #[error("transfer cancelled")]
    Cancelled,
}

impl From<KeyshiftError> for TransferError {
    fn from(err: KeyshiftError) -> Self {
        TransferError::Config(err.to_string())
    }
}

/// Transfer result type
pub type Result<T> = std::result::Result<T, TransferError>;
