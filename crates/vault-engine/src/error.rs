//! Engine error types.

use thiserror::Error;
use vault_storage::StorageError;
use vault_types::VaultError;
use vault_vector::VectorError;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, rejected before any store mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload failed to decode or did not match its digest
    #[error("Compression integrity error for {fingerprint}: {reason}")]
    CompressionIntegrity { fingerprint: String, reason: String },

    /// Two writers raced on the same fingerprint and retries ran out
    #[error("Concurrency conflict on {0}")]
    ConcurrencyConflict(String),

    /// Owner existence could not be determined
    #[error("Orphan sweep error for owner {owner_id}: {reason}")]
    OrphanSweep { owner_id: String, reason: String },

    /// Store full or unavailable; safe to retry
    #[error("Capacity error: {0}")]
    Capacity(String),

    /// Another destructive sweep holds the reaper
    #[error("Sweep already running")]
    SweepInProgress,

    /// Storage layer failure
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Similarity index failure
    #[error("Vector index error: {0}")]
    Vector(#[from] VectorError),

    /// A blocking task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl EngineError {
    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Capacity(_) | EngineError::ConcurrencyConflict(_)
        )
    }

    pub(crate) fn integrity(fingerprint: impl ToString, reason: impl ToString) -> Self {
        EngineError::CompressionIntegrity {
            fingerprint: fingerprint.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(_) | StorageError::CapacityExceeded { .. } => {
                EngineError::Capacity(err.to_string())
            }
            StorageError::InvalidOwner(msg) => EngineError::Validation(msg),
            other => EngineError::Storage(other),
        }
    }
}

impl From<VaultError> for EngineError {
    fn from(err: VaultError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}
