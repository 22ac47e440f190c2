//! Periodic vault maintenance.
//!
//! - **orphan_sweep**: destructive cleanup of orphaned references, entries
//!   and aged history
//! - **tier_reclassify**: HOT/COLD reclassification with cold recompression

pub mod orphan_sweep;
pub mod tier_reclassify;

pub use orphan_sweep::{register_orphan_sweep_job, OrphanSweepJobConfig, ORPHAN_SWEEP_JOB};
pub use tier_reclassify::{register_tier_reclassify_job, TierReclassifyJobConfig, TIER_RECLASSIFY_JOB};

/// Shared fixtures for job tests.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tempfile::TempDir;
    use vault_engine::{InMemoryOwnerDirectory, VectorVault};
    use vault_storage::{RocksVectorStore, VectorStore};
    use vault_types::Settings;
    use vault_vector::{FlatIndex, SimilarityIndex};

    pub struct TestVault {
        pub _temp: TempDir,
        pub vault: Arc<VectorVault>,
        pub owners: Arc<InMemoryOwnerDirectory>,
    }

    pub fn test_vault() -> TestVault {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.db_path = temp.path().join("db").to_string_lossy().into_owned();
        settings.similarity.dimension = 2;

        let store: Arc<dyn VectorStore> = Arc::new(RocksVectorStore::open(&temp.path().join("db")).unwrap());
        let index: Arc<dyn SimilarityIndex> = Arc::new(FlatIndex::new(2));
        let owners = Arc::new(InMemoryOwnerDirectory::new());
        let vault = Arc::new(VectorVault::new(settings, store, index, owners.clone()));
        TestVault {
            _temp: temp,
            vault,
            owners,
        }
    }
}
