//! Storage layer for the knowledge vault.
//!
//! Provides the `VectorStore` abstraction and its RocksDB implementation with:
//! - Column family isolation for entries, references, history and analytics
//! - Time-prefixed keys for age-based range scans
//! - Striped per-fingerprint write locks (single writer per fingerprint)
//! - Atomic per-entry state transitions via WriteBatch

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod locks;
pub mod store;

pub use db::RocksVectorStore;
pub use error::StorageError;
pub use keys::{FingerprintRefKey, OwnerRefKey, TimeKey};
pub use store::{
    EntryFilter, EntryIter, InsertOutcome, LinkOutcome, StoreStats, TouchOutcome, UnlinkOutcome,
    VectorStore,
};
