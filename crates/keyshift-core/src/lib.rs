//! # keyshift-core
//!
//! Building blocks shared by the keyshift transfer engine and CLI:
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | RESP2/RESP3 frame codec used to talk to source and destination |
//! | [`address`] | Connection-string parsing (`[redis://][user:pass@]host:port`) |
//! | [`config`] | TOML configuration with defaults and validation |
//! | [`error`] | Core error type |
//! | [`telemetry`] | `tracing` subscriber setup |

#![forbid(unsafe_code)]

pub mod address;
pub mod config;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use address::EndpointAddr;
pub use config::Config;
pub use error::{KeyshiftError, Result};
