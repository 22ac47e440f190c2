//! The `VectorStore` abstraction.
//!
//! A store holds storage entries, owner references, processing history and
//! analytics rows. All mutations touching the same fingerprint are
//! serialized; reads never block on writers.
//!
//! Reference counts are owned by the reference operations: `link_reference`
//! and `unlink_reference` are the only calls that change `reference_count`,
//! and each does so in the same atomic write as the reference row itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use vault_types::{
    AnalyticsEvent, Fingerprint, OwnerReference, ProcessingRecord, StorageEntry, Tier,
};

use crate::error::StorageError;

/// Lazy entry iterator returned by `VectorStore::list`.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<StorageEntry, StorageError>> + 'a>;

/// Predicate applied by `VectorStore::list`.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub tier: Option<Tier>,
    /// Only entries marked pending deletion
    pub pending_only: bool,
    /// Only entries with zero references
    pub unreferenced_only: bool,
}

impl EntryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn tier(tier: Tier) -> Self {
        Self {
            tier: Some(tier),
            ..Default::default()
        }
    }

    pub fn pending() -> Self {
        Self {
            pending_only: true,
            ..Default::default()
        }
    }

    pub fn unreferenced() -> Self {
        Self {
            unreferenced_only: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &StorageEntry) -> bool {
        if let Some(tier) = self.tier {
            if entry.tier != tier {
                return false;
            }
        }
        if self.pending_only && !entry.is_pending_deletion() {
            return false;
        }
        if self.unreferenced_only && entry.reference_count > 0 {
            return false;
        }
        true
    }
}

/// Result of `insert_if_absent`.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// This writer created the canonical entry
    Inserted,
    /// Another writer got there first; the stored entry is returned
    Existing(StorageEntry),
}

/// Result of `link_reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// New reference written, target count incremented
    Linked { reference_count: u64 },
    /// Position already pointed at this fingerprint; nothing changed
    Unchanged { reference_count: u64 },
    /// Position moved from `previous` to the new fingerprint
    Relinked {
        previous: Fingerprint,
        reference_count: u64,
        previous_marked: bool,
    },
    /// The target entry no longer exists; nothing was written
    EntryMissing,
}

/// Result of `unlink_reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkOutcome {
    pub fingerprint: Fingerprint,
    /// Count left on the entry after the decrement
    pub remaining: u64,
    /// Entry reached zero and was marked pending deletion
    pub marked_pending: bool,
}

/// Result of `touch`.
#[derive(Debug, Clone)]
pub struct TouchOutcome {
    pub entry: StorageEntry,
    /// Entry was COLD and has been promoted to HOT
    pub promoted: bool,
}

/// Row counts and sizes for the whole store.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub entry_count: u64,
    pub reference_count: u64,
    pub history_count: u64,
    pub analytics_count: u64,
    pub disk_usage_bytes: u64,
}

/// Persistence abstraction for the vault.
pub trait VectorStore: Send + Sync {
    /// Upsert an entry. On overwrite the stored reference count and pending
    /// marker are kept; a new entry starts with zero references.
    fn put(&self, entry: &StorageEntry) -> Result<(), StorageError>;

    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<StorageEntry>, StorageError>;

    /// Remove an entry. Fails with `ReferencedEntry` if the count is nonzero.
    /// Returns false if the entry did not exist.
    fn delete(&self, fingerprint: &Fingerprint) -> Result<bool, StorageError>;

    fn list(&self, filter: EntryFilter) -> Result<EntryIter<'_>, StorageError>;

    /// Record a read: bump access stats, update `last_accessed_at`, and
    /// promote a COLD entry to HOT. Returns `None` if the entry is gone.
    fn touch(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<Option<TouchOutcome>, StorageError>;

    /// First-writer-wins registration of a new fingerprint.
    fn insert_if_absent(&self, entry: &StorageEntry) -> Result<InsertOutcome, StorageError>;

    /// Atomic read-modify-write of an entry's mutable fields. The reference
    /// count and pending marker cannot be changed through this call.
    fn update_entry(
        &self,
        fingerprint: &Fingerprint,
        update: &mut dyn FnMut(&mut StorageEntry),
    ) -> Result<Option<StorageEntry>, StorageError>;

    /// Point `(owner_id, sequence)` at `reference.fingerprint`, incrementing
    /// the target only in the same write that stores the reference.
    fn link_reference(&self, reference: &OwnerReference) -> Result<LinkOutcome, StorageError>;

    /// Remove a reference and decrement its entry. Entries reaching zero are
    /// marked pending deletion, never removed.
    fn unlink_reference(
        &self,
        owner_id: &str,
        sequence: u32,
    ) -> Result<Option<UnlinkOutcome>, StorageError>;

    fn get_reference(
        &self,
        owner_id: &str,
        sequence: u32,
    ) -> Result<Option<OwnerReference>, StorageError>;

    /// All references of one owner, ordered by sequence
    fn references_for_owner(&self, owner_id: &str) -> Result<Vec<OwnerReference>, StorageError>;

    /// All `(owner_id, sequence)` positions pointing at a fingerprint
    fn references_for_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<(String, u32)>, StorageError>;

    /// Every reference in the store, ordered by owner then sequence
    fn list_references(&self) -> Result<Vec<OwnerReference>, StorageError>;

    /// Mark a zero-count entry pending deletion. Returns true if the marker
    /// was newly set.
    fn mark_pending_deletion(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Delete an entry only if it is still pending and unreferenced,
    /// re-checked under the write lock. Returns the removed entry.
    fn delete_if_orphaned(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StorageEntry>, StorageError>;

    fn record_history(&self, record: &ProcessingRecord) -> Result<(), StorageError>;

    /// History rows ordered oldest first
    fn list_history(&self) -> Result<Vec<ProcessingRecord>, StorageError>;

    fn delete_history(&self, records: &[ProcessingRecord]) -> Result<usize, StorageError>;

    fn record_analytics(&self, event: &AnalyticsEvent) -> Result<(), StorageError>;

    /// Analytics rows ordered oldest first
    fn list_analytics(&self) -> Result<Vec<AnalyticsEvent>, StorageError>;

    fn delete_analytics(&self, events: &[AnalyticsEvent]) -> Result<usize, StorageError>;

    /// Number of stored entries
    fn entry_count(&self) -> u64;

    fn stats(&self) -> Result<StoreStats, StorageError>;

    fn compact(&self) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError>;
}
