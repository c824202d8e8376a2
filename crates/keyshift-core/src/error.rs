//! Error types for keyshift-core
//!
//! Uses `thiserror` for ergonomic error definitions.

use thiserror::Error;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum KeyshiftError {
    /// Configuration parsing or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed connection string
    #[error("Invalid address '{addr}': {reason}")]
    InvalidAddress {
        /// The connection string as given
        addr: String,
        /// Why it was rejected
        reason: String,
    },

    /// Logging could not be initialized
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, KeyshiftError>;

impl KeyshiftError {
    /// Shorthand for an address rejection
    pub(crate) fn invalid_address(addr: &str, reason: impl Into<String>) -> Self {
        KeyshiftError::InvalidAddress {
            addr: addr.to_string(),
            reason: reason.into(),
        }
    }
}
