//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(String),

    /// Store busy, timed out, or failed at the IO layer
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Entry or reference not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configured entry limit reached
    #[error("Capacity exceeded: store holds the maximum of {limit} entries")]
    CapacityExceeded { limit: u64 },

    /// Delete attempted on an entry that still has references
    #[error("Entry {fingerprint} still has {count} references")]
    ReferencedEntry { fingerprint: String, count: u64 },

    /// Owner id cannot be embedded in a key
    #[error("Invalid owner id: {0}")]
    InvalidOwner(String),

    /// A stripe lock was poisoned by a panicking writer
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StorageError {
    /// Whether the caller may retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::CapacityExceeded { .. }
        )
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;
        match err.kind() {
            ErrorKind::Busy
            | ErrorKind::TimedOut
            | ErrorKind::TryAgain
            | ErrorKind::IOError
            | ErrorKind::ShutdownInProgress => StorageError::Unavailable(err.into_string()),
            _ => StorageError::RocksDb(err.into_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<vault_types::VaultError> for StorageError {
    fn from(err: vault_types::VaultError) -> Self {
        match err {
            vault_types::VaultError::InvalidInput(msg) => StorageError::InvalidOwner(msg),
            other => StorageError::Key(other.to_string()),
        }
    }
}
