//! End-to-end test infrastructure for the knowledge vault.
//!
//! Provides a shared [`TestHarness`] over a temporary RocksDB store, an
//! exact flat similarity index and an in-memory owner directory, plus
//! helpers that build deterministic documents.

use std::sync::Arc;

use vault_engine::{InMemoryOwnerDirectory, VectorVault};
use vault_storage::{EntryFilter, RocksVectorStore, VectorStore};
use vault_types::{Chunk, Settings, Tier};
use vault_vector::{FlatIndex, SimilarityIndex};

/// Vector dimension used by every harness.
pub const DIM: usize = 8;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub store: Arc<dyn VectorStore>,
    pub index: Arc<dyn SimilarityIndex>,
    pub owners: Arc<InMemoryOwnerDirectory>,
    pub vault: Arc<VectorVault>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Build a harness after adjusting the default settings.
    pub fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let mut settings = Settings::default();
        settings.db_path = temp_dir.path().join("db").to_string_lossy().into_owned();
        settings.similarity.index_path = temp_dir.path().join("index").to_string_lossy().into_owned();
        settings.similarity.dimension = DIM;
        adjust(&mut settings);

        let store: Arc<dyn VectorStore> = Arc::new(
            RocksVectorStore::open(&settings.expanded_db_path())
                .expect("Failed to open test store")
                .with_max_entries(settings.storage.max_entries),
        );
        let index: Arc<dyn SimilarityIndex> = Arc::new(FlatIndex::new(DIM));
        let owners = Arc::new(InMemoryOwnerDirectory::new());
        let vault = Arc::new(VectorVault::new(
            settings,
            Arc::clone(&store),
            Arc::clone(&index),
            owners.clone(),
        ));

        Self {
            _temp_dir: temp_dir,
            store,
            index,
            owners,
            vault,
        }
    }

    /// Register the owner and ingest its chunks.
    pub async fn ingest_owned(&self, owner_id: &str, chunks: Vec<Chunk>) -> vault_engine::IngestResult {
        self.owners.register(owner_id);
        self.vault
            .ingest(owner_id, chunks)
            .await
            .expect("Ingestion failed")
    }

    pub fn entry_count(&self) -> u64 {
        self.store.entry_count()
    }

    /// Reference count of the entry at `(owner_id, sequence)`.
    pub fn reference_count_at(&self, owner_id: &str, sequence: u32) -> u64 {
        let reference = self
            .store
            .get_reference(owner_id, sequence)
            .expect("Failed to read reference")
            .expect("No reference at position");
        self.store
            .get(&reference.fingerprint)
            .expect("Failed to read entry")
            .expect("Entry missing")
            .reference_count
    }

    /// Tier counts straight from the stored rows.
    pub fn tier_counts(&self) -> (u64, u64) {
        let mut hot = 0;
        let mut cold = 0;
        let entries = self
            .store
            .list(EntryFilter::all())
            .expect("Failed to list entries");
        for entry in entries {
            match entry.expect("Failed to decode entry").tier {
                Tier::Hot => hot += 1,
                Tier::Cold => cold += 1,
            }
        }
        (hot, cold)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A deterministic, non-zero vector for `seed`.
pub fn vector_for(seed: usize) -> Vec<f32> {
    (0..DIM)
        .map(|j| ((seed * 31 + j * 7) % 17) as f32 + 1.0)
        .collect()
}

/// A unit vector along `axis`, slightly tilted so no two axes tie.
pub fn axis_vector(axis: usize) -> Vec<f32> {
    let mut v = vec![0.01; DIM];
    v[axis % DIM] = 1.0;
    v
}

/// Compressible chunk text unique to `seed`.
pub fn document_text(seed: usize) -> String {
    let sentence = format!(
        "Document {} covers retention windows, orphan sweeps and tier placement for stored vectors. ",
        seed
    );
    sentence.repeat(8)
}

pub fn document_chunk(seed: usize) -> Chunk {
    Chunk::new(document_text(seed), vector_for(seed))
}

/// `count` owners `doc-0..doc-{count-1}`, one unique chunk each.
pub fn create_documents(count: usize) -> Vec<(String, Vec<Chunk>)> {
    (0..count)
        .map(|i| (format!("doc-{}", i), vec![document_chunk(i)]))
        .collect()
}
