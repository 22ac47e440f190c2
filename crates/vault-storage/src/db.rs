//! RocksDB implementation of `VectorStore`.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Striped write locks so each fingerprint has a single writer
//! - One WriteBatch per entry state transition (all-or-nothing)
//! - Entry-count tracking for the optional capacity limit

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use vault_types::{
    validate_owner_id, AnalyticsEvent, Fingerprint, OwnerReference, ProcessingRecord,
    StorageEntry,
};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_ANALYTICS_EVENTS, CF_ENTRIES, CF_FINGERPRINT_REFS,
    CF_OWNER_REFS, CF_PROCESSING_HISTORY,
};
use crate::error::StorageError;
use crate::keys::{FingerprintRefKey, OwnerRefKey, TimeKey};
use crate::locks::StripedLocks;
use crate::store::{
    EntryFilter, EntryIter, InsertOutcome, LinkOutcome, StoreStats, TouchOutcome, UnlinkOutcome,
    VectorStore,
};

/// RocksDB-backed vector store
pub struct RocksVectorStore {
    db: DB,
    locks: StripedLocks,
    entry_count: AtomicU64,
    max_entries: Option<u64>,
}

impl RocksVectorStore {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening vector store at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let entry_count = {
            let cf = db
                .cf_handle(CF_ENTRIES)
                .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_ENTRIES.to_string()))?;
            count_cf_entries(&db, cf)?
        };
        info!(entries = entry_count, "Vector store opened");

        Ok(Self {
            db,
            locks: StripedLocks::default(),
            entry_count: AtomicU64::new(entry_count),
            max_entries: None,
        })
    }

    /// Refuse new entries once `limit` is reached.
    pub fn with_max_entries(mut self, limit: Option<u64>) -> Self {
        self.max_entries = limit;
        self
    }

    /// Flush and release the database.
    pub fn close(self) -> Result<(), StorageError> {
        self.flush()?;
        info!("Vector store closed");
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn read_entry(&self, fingerprint: &Fingerprint) -> Result<Option<StorageEntry>, StorageError> {
        let cf = self.cf(CF_ENTRIES)?;
        match self.db.get_cf(cf, fingerprint.as_bytes())? {
            Some(bytes) => Ok(Some(StorageEntry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_reference_at(&self, key: &[u8]) -> Result<Option<OwnerReference>, StorageError> {
        let cf = self.cf(CF_OWNER_REFS)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(OwnerReference::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_entry(&self, batch: &mut WriteBatch, entry: &StorageEntry) -> Result<(), StorageError> {
        let cf = self.cf(CF_ENTRIES)?;
        batch.put_cf(cf, entry.fingerprint.as_bytes(), entry.to_bytes()?);
        Ok(())
    }

    /// Reserve one slot against the capacity limit.
    fn reserve_slot(&self) -> Result<(), StorageError> {
        let limit = self.max_entries;
        self.entry_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| match limit {
                Some(max) if count >= max => None,
                _ => Some(count + 1),
            })
            .map(|_| ())
            .map_err(|_| StorageError::CapacityExceeded {
                limit: limit.unwrap_or(0),
            })
    }

    fn release_slot(&self) {
        let _ = self
            .entry_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)));
    }

    /// Write a brand-new entry with zero references.
    fn create_entry(&self, entry: &StorageEntry) -> Result<(), StorageError> {
        self.reserve_slot()?;
        let mut fresh = entry.clone();
        fresh.reference_count = 0;
        let mut batch = WriteBatch::default();
        let written = self
            .write_entry(&mut batch, &fresh)
            .and_then(|_| self.db.write(batch).map_err(StorageError::from));
        if written.is_err() {
            self.release_slot();
        }
        written
    }

    fn prefix_scan(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StorageError> {
        let cf = self.cf(cf_name)?;
        let mut results = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key, value));
        }
        Ok(results)
    }

    fn delete_time_keyed(&self, cf_name: &str, keys: Vec<Vec<u8>>) -> Result<usize, StorageError> {
        let cf = self.cf(cf_name)?;
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for key in keys {
            if self.db.get_cf(cf, &key)?.is_some() {
                batch.delete_cf(cf, &key);
                count += 1;
            }
        }
        if count > 0 {
            self.db.write(batch)?;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let path = self.db.path();
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(path) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        total_size
    }
}

fn count_cf_entries(db: &DB, cf: &ColumnFamily) -> Result<u64, StorageError> {
    let mut count = 0u64;
    for item in db.iterator_cf(cf, IteratorMode::Start) {
        item?;
        count += 1;
    }
    Ok(count)
}

impl VectorStore for RocksVectorStore {
    fn put(&self, entry: &StorageEntry) -> Result<(), StorageError> {
        let _guard = self.locks.lock_fingerprint(&entry.fingerprint)?;
        match self.read_entry(&entry.fingerprint)? {
            Some(existing) => {
                let mut updated = entry.clone();
                updated.reference_count = existing.reference_count;
                updated.pending_deletion_since = existing.pending_deletion_since;
                let mut batch = WriteBatch::default();
                self.write_entry(&mut batch, &updated)?;
                self.db.write(batch)?;
                Ok(())
            }
            None => self.create_entry(entry),
        }
    }

    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<StorageEntry>, StorageError> {
        self.read_entry(fingerprint)
    }

    fn delete(&self, fingerprint: &Fingerprint) -> Result<bool, StorageError> {
        let _guard = self.locks.lock_fingerprint(fingerprint)?;
        let Some(entry) = self.read_entry(fingerprint)? else {
            return Ok(false);
        };
        if entry.reference_count > 0 {
            return Err(StorageError::ReferencedEntry {
                fingerprint: fingerprint.to_hex(),
                count: entry.reference_count,
            });
        }
        let cf = self.cf(CF_ENTRIES)?;
        self.db.delete_cf(cf, fingerprint.as_bytes())?;
        self.release_slot();
        debug!(fingerprint = %fingerprint.short(), "Deleted entry");
        Ok(true)
    }

    fn list(&self, filter: EntryFilter) -> Result<EntryIter<'_>, StorageError> {
        let cf = self.cf(CF_ENTRIES)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);
        Ok(Box::new(iter.filter_map(move |item| {
            let decoded = item
                .map_err(StorageError::from)
                .and_then(|(_, value)| StorageEntry::from_bytes(&value).map_err(StorageError::from));
            match decoded {
                Ok(entry) if filter.matches(&entry) => Some(Ok(entry)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        })))
    }

    fn touch(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<Option<TouchOutcome>, StorageError> {
        let _guard = self.locks.lock_fingerprint(fingerprint)?;
        let Some(mut entry) = self.read_entry(fingerprint)? else {
            return Ok(None);
        };
        entry.access.record(now);
        entry.last_accessed_at = now;
        let promoted = entry.tier == vault_types::Tier::Cold;
        if promoted {
            entry.tier = vault_types::Tier::Hot;
            entry.promoted_at = Some(now);
        }
        let mut batch = WriteBatch::default();
        self.write_entry(&mut batch, &entry)?;
        self.db.write(batch)?;
        if promoted {
            debug!(fingerprint = %fingerprint.short(), "Read-through promotion to HOT");
        }
        Ok(Some(TouchOutcome { entry, promoted }))
    }

    fn insert_if_absent(&self, entry: &StorageEntry) -> Result<InsertOutcome, StorageError> {
        let _guard = self.locks.lock_fingerprint(&entry.fingerprint)?;
        if let Some(existing) = self.read_entry(&entry.fingerprint)? {
            return Ok(InsertOutcome::Existing(existing));
        }
        self.create_entry(entry)?;
        debug!(fingerprint = %entry.fingerprint.short(), "Registered new entry");
        Ok(InsertOutcome::Inserted)
    }

    fn update_entry(
        &self,
        fingerprint: &Fingerprint,
        update: &mut dyn FnMut(&mut StorageEntry),
    ) -> Result<Option<StorageEntry>, StorageError> {
        let _guard = self.locks.lock_fingerprint(fingerprint)?;
        let Some(mut entry) = self.read_entry(fingerprint)? else {
            return Ok(None);
        };
        let reference_count = entry.reference_count;
        let pending = entry.pending_deletion_since;
        update(&mut entry);
        entry.fingerprint = *fingerprint;
        entry.reference_count = reference_count;
        entry.pending_deletion_since = pending;

        let mut batch = WriteBatch::default();
        self.write_entry(&mut batch, &entry)?;
        self.db.write(batch)?;
        Ok(Some(entry))
    }

    fn link_reference(&self, reference: &OwnerReference) -> Result<LinkOutcome, StorageError> {
        validate_owner_id(&reference.owner_id)?;
        let owner_id = reference.owner_id.as_str();
        let sequence = reference.sequence;
        let ref_key = OwnerRefKey::new(owner_id, sequence).to_bytes();

        loop {
            let previous = self.read_reference_at(&ref_key)?.map(|r| r.fingerprint);

            let mut stripes = vec![
                self.locks.owner_stripe(owner_id, sequence),
                self.locks.fingerprint_stripe(&reference.fingerprint),
            ];
            if let Some(prev) = previous {
                stripes.push(self.locks.fingerprint_stripe(&prev));
            }
            let _guards = self.locks.lock(&stripes)?;

            // Another writer moved this position between the read and the lock.
            if self.read_reference_at(&ref_key)?.map(|r| r.fingerprint) != previous {
                continue;
            }

            let Some(mut target) = self.read_entry(&reference.fingerprint)? else {
                return Ok(LinkOutcome::EntryMissing);
            };
            if previous == Some(reference.fingerprint) {
                return Ok(LinkOutcome::Unchanged {
                    reference_count: target.reference_count,
                });
            }

            let refs_cf = self.cf(CF_OWNER_REFS)?;
            let fp_refs_cf = self.cf(CF_FINGERPRINT_REFS)?;
            let mut batch = WriteBatch::default();

            target.reference_count += 1;
            target.pending_deletion_since = None;
            self.write_entry(&mut batch, &target)?;
            batch.put_cf(refs_cf, &ref_key, reference.to_bytes()?);
            batch.put_cf(
                fp_refs_cf,
                FingerprintRefKey::new(reference.fingerprint, owner_id, sequence).to_bytes(),
                b"",
            );

            let outcome = match previous {
                None => LinkOutcome::Linked {
                    reference_count: target.reference_count,
                },
                Some(prev) => {
                    batch.delete_cf(
                        fp_refs_cf,
                        FingerprintRefKey::new(prev, owner_id, sequence).to_bytes(),
                    );
                    let mut previous_marked = false;
                    if let Some(mut old) = self.read_entry(&prev)? {
                        old.reference_count = old.reference_count.saturating_sub(1);
                        if old.reference_count == 0 && old.pending_deletion_since.is_none() {
                            old.pending_deletion_since = Some(Utc::now());
                            previous_marked = true;
                        }
                        self.write_entry(&mut batch, &old)?;
                    }
                    LinkOutcome::Relinked {
                        previous: prev,
                        reference_count: target.reference_count,
                        previous_marked,
                    }
                }
            };

            self.db.write(batch)?;
            debug!(
                owner_id = %owner_id,
                sequence,
                fingerprint = %reference.fingerprint.short(),
                references = target.reference_count,
                "Linked reference"
            );
            return Ok(outcome);
        }
    }

    fn unlink_reference(
        &self,
        owner_id: &str,
        sequence: u32,
    ) -> Result<Option<UnlinkOutcome>, StorageError> {
        validate_owner_id(owner_id)?;
        let ref_key = OwnerRefKey::new(owner_id, sequence).to_bytes();

        loop {
            let Some(existing) = self.read_reference_at(&ref_key)? else {
                return Ok(None);
            };
            let fingerprint = existing.fingerprint;
            let _guards = self.locks.lock(&[
                self.locks.owner_stripe(owner_id, sequence),
                self.locks.fingerprint_stripe(&fingerprint),
            ])?;

            match self.read_reference_at(&ref_key)? {
                Some(current) if current.fingerprint == fingerprint => {}
                Some(_) => continue,
                None => return Ok(None),
            }

            let refs_cf = self.cf(CF_OWNER_REFS)?;
            let fp_refs_cf = self.cf(CF_FINGERPRINT_REFS)?;
            let mut batch = WriteBatch::default();
            batch.delete_cf(refs_cf, &ref_key);
            batch.delete_cf(
                fp_refs_cf,
                FingerprintRefKey::new(fingerprint, owner_id, sequence).to_bytes(),
            );

            let mut remaining = 0;
            let mut marked_pending = false;
            match self.read_entry(&fingerprint)? {
                Some(mut entry) => {
                    entry.reference_count = entry.reference_count.saturating_sub(1);
                    remaining = entry.reference_count;
                    if remaining == 0 && entry.pending_deletion_since.is_none() {
                        entry.pending_deletion_since = Some(Utc::now());
                        marked_pending = true;
                    }
                    self.write_entry(&mut batch, &entry)?;
                }
                None => {
                    warn!(
                        owner_id = %owner_id,
                        sequence,
                        fingerprint = %fingerprint.short(),
                        "Reference pointed at a missing entry"
                    );
                }
            }

            self.db.write(batch)?;
            debug!(
                owner_id = %owner_id,
                sequence,
                fingerprint = %fingerprint.short(),
                remaining,
                "Unlinked reference"
            );
            return Ok(Some(UnlinkOutcome {
                fingerprint,
                remaining,
                marked_pending,
            }));
        }
    }

    fn get_reference(
        &self,
        owner_id: &str,
        sequence: u32,
    ) -> Result<Option<OwnerReference>, StorageError> {
        validate_owner_id(owner_id)?;
        self.read_reference_at(&OwnerRefKey::new(owner_id, sequence).to_bytes())
    }

    fn references_for_owner(&self, owner_id: &str) -> Result<Vec<OwnerReference>, StorageError> {
        validate_owner_id(owner_id)?;
        self.prefix_scan(CF_OWNER_REFS, &OwnerRefKey::owner_prefix(owner_id))?
            .into_iter()
            .map(|(_, value)| OwnerReference::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }

    fn references_for_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<(String, u32)>, StorageError> {
        self.prefix_scan(
            CF_FINGERPRINT_REFS,
            &FingerprintRefKey::fingerprint_prefix(fingerprint),
        )?
        .into_iter()
        .map(|(key, _)| FingerprintRefKey::from_bytes(&key).map(|k| (k.owner_id, k.sequence)))
        .collect()
    }

    fn list_references(&self) -> Result<Vec<OwnerReference>, StorageError> {
        self.prefix_scan(CF_OWNER_REFS, b"ref:")?
            .into_iter()
            .map(|(_, value)| OwnerReference::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }

    fn mark_pending_deletion(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let _guard = self.locks.lock_fingerprint(fingerprint)?;
        let Some(mut entry) = self.read_entry(fingerprint)? else {
            return Ok(false);
        };
        if entry.reference_count > 0 || entry.pending_deletion_since.is_some() {
            return Ok(false);
        }
        entry.pending_deletion_since = Some(now);
        let mut batch = WriteBatch::default();
        self.write_entry(&mut batch, &entry)?;
        self.db.write(batch)?;
        Ok(true)
    }

    fn delete_if_orphaned(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StorageEntry>, StorageError> {
        let _guard = self.locks.lock_fingerprint(fingerprint)?;
        let Some(entry) = self.read_entry(fingerprint)? else {
            return Ok(None);
        };
        if entry.reference_count > 0 || entry.pending_deletion_since.is_none() {
            return Ok(None);
        }
        let dangling = self.prefix_scan(
            CF_FINGERPRINT_REFS,
            &FingerprintRefKey::fingerprint_prefix(fingerprint),
        )?;
        if !dangling.is_empty() {
            warn!(
                fingerprint = %fingerprint.short(),
                references = dangling.len(),
                "Zero-count entry still has reverse references, not deleting"
            );
            return Ok(None);
        }
        let cf = self.cf(CF_ENTRIES)?;
        self.db.delete_cf(cf, fingerprint.as_bytes())?;
        self.release_slot();
        Ok(Some(entry))
    }

    fn record_history(&self, record: &ProcessingRecord) -> Result<(), StorageError> {
        let cf = self.cf(CF_PROCESSING_HISTORY)?;
        let key = TimeKey::history(record.timestamp_ms(), &record.record_id)?;
        self.db.put_cf(cf, key.to_bytes(), record.to_bytes()?)?;
        Ok(())
    }

    fn list_history(&self) -> Result<Vec<ProcessingRecord>, StorageError> {
        self.prefix_scan(CF_PROCESSING_HISTORY, b"hist:")?
            .into_iter()
            .map(|(_, value)| ProcessingRecord::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }

    fn delete_history(&self, records: &[ProcessingRecord]) -> Result<usize, StorageError> {
        let keys = records
            .iter()
            .map(|r| TimeKey::history(r.timestamp_ms(), &r.record_id).map(|k| k.to_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        self.delete_time_keyed(CF_PROCESSING_HISTORY, keys)
    }

    fn record_analytics(&self, event: &AnalyticsEvent) -> Result<(), StorageError> {
        let cf = self.cf(CF_ANALYTICS_EVENTS)?;
        let key = TimeKey::analytics(event.timestamp_ms(), &event.event_id)?;
        self.db.put_cf(cf, key.to_bytes(), event.to_bytes()?)?;
        Ok(())
    }

    fn list_analytics(&self) -> Result<Vec<AnalyticsEvent>, StorageError> {
        self.prefix_scan(CF_ANALYTICS_EVENTS, b"evt:")?
            .into_iter()
            .map(|(_, value)| AnalyticsEvent::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }

    fn delete_analytics(&self, events: &[AnalyticsEvent]) -> Result<usize, StorageError> {
        let keys = events
            .iter()
            .map(|e| TimeKey::analytics(e.timestamp_ms(), &e.event_id).map(|k| k.to_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        self.delete_time_keyed(CF_ANALYTICS_EVENTS, keys)
    }

    fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::SeqCst)
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        Ok(StoreStats {
            entry_count: count_cf_entries(&self.db, self.cf(CF_ENTRIES)?)?,
            reference_count: count_cf_entries(&self.db, self.cf(CF_OWNER_REFS)?)?,
            history_count: count_cf_entries(&self.db, self.cf(CF_PROCESSING_HISTORY)?)?,
            analytics_count: count_cf_entries(&self.db, self.cf(CF_ANALYTICS_EVENTS)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn compact(&self) -> Result<(), StorageError> {
        info!("Starting full compaction...");
        for cf_name in ALL_CF_NAMES {
            let cf = self.cf(cf_name)?;
            self.db.compact_range_cf::<&[u8], &[u8]>(cf, None, None);
        }
        info!("Compaction complete");
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            let cf = self.cf(cf_name)?;
            self.db.flush_cf(cf)?;
        }
        Ok(())
    }
}
