//! Error types shared across the knowledge vault.

use thiserror::Error;

/// Unified error type for domain-level operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed fingerprint (wrong length or bad hex)
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
