//! # keyshift
//!
//! One-shot bulk migration of a Redis-compatible keyspace: every key is
//! read from an old instance with `DUMP`/`PTTL`, written to a freshly
//! cleared new instance with `RESTORE`, and the two key counts are compared
//! at the end.
//!
//! ## Crate Organization
//!
//! | Crate | Description |
//! |-------|-------------|
//! | [`keyshift-core`] | RESP codec, connection strings, configuration, logging setup |
//! | `keyshift` | Transfer engine ([`transfer`]) and the `keyshift` binary |

// ── Re-exports from keyshift-core ────────────────────────────────────────────

pub use keyshift_core::address;
pub use keyshift_core::config;
pub use keyshift_core::error;
pub use keyshift_core::protocol;
pub use keyshift_core::telemetry;

pub use keyshift_core::{Config, EndpointAddr, KeyshiftError};

// ── Transfer engine ──────────────────────────────────────────────────────────

pub mod transfer;

pub use transfer::{Migrator, TransferError, TransferReport};
