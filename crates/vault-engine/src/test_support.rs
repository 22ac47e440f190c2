//! Store wrapper that injects storage failures into engine tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use vault_storage::{
    EntryFilter, EntryIter, InsertOutcome, LinkOutcome, StorageError, StoreStats, TouchOutcome,
    UnlinkOutcome, VectorStore,
};
use vault_types::{AnalyticsEvent, Fingerprint, OwnerReference, ProcessingRecord, StorageEntry};

/// Delegates to an inner store. `delete_if_orphaned` starts failing once
/// `deletes_allowed` calls have gone through, and `get` reports a decode
/// error for fingerprints marked unreadable.
pub struct FaultyStore {
    inner: Arc<dyn VectorStore>,
    deletes_allowed: usize,
    deletes_seen: AtomicUsize,
    unreadable: Mutex<HashSet<Fingerprint>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn VectorStore>) -> Self {
        Self {
            inner,
            deletes_allowed: usize::MAX,
            deletes_seen: AtomicUsize::new(0),
            unreadable: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_deletes_after(mut self, allowed: usize) -> Self {
        self.deletes_allowed = allowed;
        self
    }

    pub fn mark_unreadable(&self, fingerprint: Fingerprint) {
        self.unreadable.lock().unwrap().insert(fingerprint);
    }
}

impl VectorStore for FaultyStore {
    fn put(&self, entry: &StorageEntry) -> Result<(), StorageError> {
        self.inner.put(entry)
    }

    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<StorageEntry>, StorageError> {
        if self.unreadable.lock().unwrap().contains(fingerprint) {
            return Err(StorageError::Serialization(format!(
                "unknown variant in entry {}",
                fingerprint.short()
            )));
        }
        self.inner.get(fingerprint)
    }

    fn delete(&self, fingerprint: &Fingerprint) -> Result<bool, StorageError> {
        self.inner.delete(fingerprint)
    }

    fn list(&self, filter: EntryFilter) -> Result<EntryIter<'_>, StorageError> {
        self.inner.list(filter)
    }

    fn touch(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<Option<TouchOutcome>, StorageError> {
        self.inner.touch(fingerprint, now)
    }

    fn insert_if_absent(&self, entry: &StorageEntry) -> Result<InsertOutcome, StorageError> {
        self.inner.insert_if_absent(entry)
    }

    fn update_entry(
        &self,
        fingerprint: &Fingerprint,
        update: &mut dyn FnMut(&mut StorageEntry),
    ) -> Result<Option<StorageEntry>, StorageError> {
        self.inner.update_entry(fingerprint, update)
    }

    fn link_reference(&self, reference: &OwnerReference) -> Result<LinkOutcome, StorageError> {
        self.inner.link_reference(reference)
    }

    fn unlink_reference(
        &self,
        owner_id: &str,
        sequence: u32,
    ) -> Result<Option<UnlinkOutcome>, StorageError> {
        self.inner.unlink_reference(owner_id, sequence)
    }

    fn get_reference(
        &self,
        owner_id: &str,
        sequence: u32,
    ) -> Result<Option<OwnerReference>, StorageError> {
        self.inner.get_reference(owner_id, sequence)
    }

    fn references_for_owner(&self, owner_id: &str) -> Result<Vec<OwnerReference>, StorageError> {
        self.inner.references_for_owner(owner_id)
    }

    fn references_for_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<(String, u32)>, StorageError> {
        self.inner.references_for_fingerprint(fingerprint)
    }

    fn list_references(&self) -> Result<Vec<OwnerReference>, StorageError> {
        self.inner.list_references()
    }

    fn mark_pending_deletion(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.inner.mark_pending_deletion(fingerprint, now)
    }

    fn delete_if_orphaned(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StorageEntry>, StorageError> {
        if self.deletes_seen.fetch_add(1, Ordering::SeqCst) >= self.deletes_allowed {
            return Err(StorageError::Unavailable("injected delete failure".into()));
        }
        self.inner.delete_if_orphaned(fingerprint)
    }

    fn record_history(&self, record: &ProcessingRecord) -> Result<(), StorageError> {
        self.inner.record_history(record)
    }

    fn list_history(&self) -> Result<Vec<ProcessingRecord>, StorageError> {
        self.inner.list_history()
    }

    fn delete_history(&self, records: &[ProcessingRecord]) -> Result<usize, StorageError> {
        self.inner.delete_history(records)
    }

    fn record_analytics(&self, event: &AnalyticsEvent) -> Result<(), StorageError> {
        self.inner.record_analytics(event)
    }

    fn list_analytics(&self) -> Result<Vec<AnalyticsEvent>, StorageError> {
        self.inner.list_analytics()
    }

    fn delete_analytics(&self, events: &[AnalyticsEvent]) -> Result<usize, StorageError> {
        self.inner.delete_analytics(events)
    }

    fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        self.inner.stats()
    }

    fn compact(&self) -> Result<(), StorageError> {
        self.inner.compact()
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.inner.flush()
    }
}
