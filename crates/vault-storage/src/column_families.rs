//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - entries: one record per distinct fingerprint (point reads, read-modify-write)
//! - owner_refs: owner chunk position -> fingerprint (prefix scans by owner)
//! - fingerprint_refs: reverse index fingerprint -> owner positions
//! - processing_history: append-only ingestion records (time-keyed)
//! - analytics_events: append-only analytics rows (time-keyed)

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for storage entries
pub const CF_ENTRIES: &str = "entries";

/// Column family name for owner references
pub const CF_OWNER_REFS: &str = "owner_refs";

/// Column family name for the fingerprint -> owner reverse index
pub const CF_FINGERPRINT_REFS: &str = "fingerprint_refs";

/// Column family name for processing history
pub const CF_PROCESSING_HISTORY: &str = "processing_history";

/// Column family name for analytics events
pub const CF_ANALYTICS_EVENTS: &str = "analytics_events";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_ENTRIES,
    CF_OWNER_REFS,
    CF_FINGERPRINT_REFS,
    CF_PROCESSING_HISTORY,
    CF_ANALYTICS_EVENTS,
];

/// Payloads are already compressed per entry; skip block compression.
fn entries_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::None);
    opts
}

/// Append-only, time-keyed rows compress well with zstd.
fn append_only_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_ENTRIES, entries_options()),
        ColumnFamilyDescriptor::new(CF_OWNER_REFS, Options::default()),
        ColumnFamilyDescriptor::new(CF_FINGERPRINT_REFS, Options::default()),
        ColumnFamilyDescriptor::new(CF_PROCESSING_HISTORY, append_only_options()),
        ColumnFamilyDescriptor::new(CF_ANALYTICS_EVENTS, append_only_options()),
    ]
}
