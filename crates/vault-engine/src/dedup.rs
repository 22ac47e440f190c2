//! Fingerprint to canonical entry resolution.
//!
//! Registration is first-writer-wins: `insert_if_absent` runs under the
//! fingerprint's stripe lock, so two batches racing on the same novel
//! fingerprint create exactly one entry. The loser gets the winner's entry
//! back and links to it instead.

use std::sync::Arc;

use tracing::debug;
use vault_storage::{InsertOutcome, VectorStore};
use vault_types::{Fingerprint, StorageEntry};

use crate::error::EngineError;
use crate::metrics::EngineMetrics;

/// Outcome of `DeduplicationIndex::register`.
#[derive(Debug, Clone)]
pub enum Registration {
    /// This writer's entry is canonical
    Created(StorageEntry),
    /// Another writer committed first; this is its entry
    Resolved(StorageEntry),
}

impl Registration {
    pub fn entry(&self) -> &StorageEntry {
        match self {
            Registration::Created(entry) | Registration::Resolved(entry) => entry,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Registration::Created(_))
    }
}

/// Exact-match deduplication over the entry table.
#[derive(Clone)]
pub struct DeduplicationIndex {
    store: Arc<dyn VectorStore>,
    metrics: Arc<EngineMetrics>,
}

impl DeduplicationIndex {
    pub fn new(store: Arc<dyn VectorStore>, metrics: Arc<EngineMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn resolve(&self, fingerprint: &Fingerprint) -> Result<Option<StorageEntry>, EngineError> {
        Ok(self.store.get(fingerprint)?)
    }

    /// Register a new canonical entry, or resolve to the one that won the race.
    pub fn register(&self, entry: StorageEntry) -> Result<Registration, EngineError> {
        match self.store.insert_if_absent(&entry)? {
            InsertOutcome::Inserted => Ok(Registration::Created(entry)),
            InsertOutcome::Existing(winner) => {
                // Lost the race. Recovered here, never surfaced.
                EngineMetrics::incr(&self.metrics.registration_races, 1);
                debug!(
                    fingerprint = %entry.fingerprint.short(),
                    "Registration raced, linking to existing entry"
                );
                Ok(Registration::Resolved(winner))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use vault_storage::RocksVectorStore;
    use vault_types::CompressionAlgorithm;

    fn entry(n: u8, payload: &[u8]) -> StorageEntry {
        StorageEntry::new(
            Fingerprint::from_bytes([n; 32]),
            payload.to_vec(),
            CompressionAlgorithm::None,
            1.0,
            payload.len() as u64,
            String::new(),
            Utc::now(),
        )
    }

    fn index() -> (TempDir, DeduplicationIndex, Arc<EngineMetrics>) {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(RocksVectorStore::open(temp.path()).unwrap());
        let metrics = Arc::new(EngineMetrics::new());
        (temp, DeduplicationIndex::new(store, metrics.clone()), metrics)
    }

    #[test]
    fn test_resolve_miss_then_hit() {
        let (_temp, dedup, _) = index();
        let fp = Fingerprint::from_bytes([7; 32]);
        assert!(dedup.resolve(&fp).unwrap().is_none());
        assert!(dedup.register(entry(7, b"first")).unwrap().is_created());
        assert_eq!(dedup.resolve(&fp).unwrap().unwrap().compressed_payload, b"first");
    }

    #[test]
    fn test_second_writer_resolves_to_first() {
        let (_temp, dedup, metrics) = index();
        assert!(dedup.register(entry(1, b"winner")).unwrap().is_created());

        let second = dedup.register(entry(1, b"loser")).unwrap();
        assert!(!second.is_created());
        assert_eq!(second.entry().compressed_payload, b"winner");
        assert_eq!(metrics.registration_races.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_concurrent_registration_creates_one_entry() {
        let (_temp, dedup, _) = index();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dedup = dedup.clone();
                std::thread::spawn(move || {
                    dedup
                        .register(entry(9, format!("writer-{}", i).as_bytes()))
                        .unwrap()
                        .is_created()
                })
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|c| *c)
            .count();
        assert_eq!(created, 1);
    }
}
