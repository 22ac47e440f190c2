//! # vault-types
//!
//! Shared domain types for the knowledge vault.
//!
//! This crate defines the core data structures used throughout the system:
//! - Chunks: text plus embedding submitted by an owner
//! - Fingerprints: content digests used for exact deduplication
//! - Storage entries: the canonical record per distinct fingerprint
//! - Owner references: links from owner chunk positions to entries
//! - Processing history and analytics records
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use vault_types::{Chunk, Settings};
//!
//! let chunk = Chunk::new("hello", vec![0.1, 0.2]);
//! let settings = Settings::default();
//! assert!(chunk.validate(settings.ingest.max_text_bytes, None).is_ok());
//! ```

pub mod chunk;
pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod records;
pub mod reference;
pub mod time;

pub use chunk::{validate_owner_id, Chunk, ChunkMetadata, ChunkPayload, MetadataValue};
pub use config::{
    CompressionConfig, FingerprintConfig, IngestConfig, ReaperConfig, SchedulerSettings,
    Settings, SimilarityBackend, SimilarityConfig, StorageConfig, TieringConfig,
};
pub use entry::{AccessStats, CompressionAlgorithm, StorageEntry, Tier};
pub use error::VaultError;
pub use fingerprint::Fingerprint;
pub use records::{AnalyticsEvent, AnalyticsKind, ProcessingRecord};
pub use reference::OwnerReference;
pub use time::{cutoff_before, duration_from_days, duration_from_secs};
