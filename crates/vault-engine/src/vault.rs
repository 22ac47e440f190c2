//! The vault facade.
//!
//! `VectorVault` wires every component to one explicitly constructed store,
//! similarity index and owner directory. There is no global state; tests
//! build isolated vaults over temporary directories.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vault_storage::{EntryFilter, RocksVectorStore, StoreStats, VectorStore};
use vault_types::{AnalyticsEvent, AnalyticsKind, Chunk, Settings, SimilarityBackend};
use vault_vector::{FlatIndex, HnswConfig, HnswIndex, IndexStats, SimilarityIndex};

use crate::analyzer::{AnalysisReport, OptimizationAnalyzer};
use crate::compress::Compressor;
use crate::error::EngineError;
use crate::fingerprint::ContentFingerprinter;
use crate::metrics::{EngineMetrics, EngineMetricsSnapshot};
use crate::owners::OwnerDirectory;
use crate::pipeline::{IngestResult, IngestionPipeline};
use crate::query::{OwnerScope, QueryHit, QueryService};
use crate::reaper::{CleanupOptions, CleanupResult, OrphanAnalysis, OrphanReaper, ReleaseResult};
use crate::report::{OptimizationReport, ReportType};
use crate::tier::{ReclassifyStats, TierClassifier, TierManager};

/// Store, index and counter statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStats {
    pub store: StoreStats,
    pub index: IndexStats,
    pub metrics: EngineMetricsSnapshot,
}

/// Result of rebuilding the similarity index from stored payloads.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildStats {
    pub indexed: u64,
    pub skipped_corrupt: u64,
}

/// Storage optimization engine.
pub struct VectorVault {
    settings: Settings,
    store: Arc<dyn VectorStore>,
    index: Arc<dyn SimilarityIndex>,
    metrics: Arc<EngineMetrics>,
    pipeline: IngestionPipeline,
    query: QueryService,
    reaper: OrphanReaper,
    tiers: Arc<TierManager>,
    analyzer: OptimizationAnalyzer,
}

impl VectorVault {
    /// Assemble a vault over existing collaborators.
    pub fn new(
        settings: Settings,
        store: Arc<dyn VectorStore>,
        index: Arc<dyn SimilarityIndex>,
        owners: Arc<dyn OwnerDirectory>,
    ) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let classifier = TierClassifier::new(&settings.tiering);
        let compressor = Compressor::new(&settings.compression);

        let pipeline = IngestionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&index),
            ContentFingerprinter::new(&settings.fingerprint),
            compressor.clone(),
            classifier.clone(),
            &settings.ingest,
            Arc::clone(&metrics),
        );
        let query = QueryService::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&metrics),
            settings.similarity.oversample,
        );
        let reaper = OrphanReaper::new(
            Arc::clone(&store),
            owners,
            Arc::clone(&metrics),
            settings.reaper.clone(),
        );
        let tiers = Arc::new(TierManager::new(Arc::clone(&store), &settings.tiering, compressor));

        Self {
            settings,
            store,
            index,
            metrics,
            pipeline,
            query,
            reaper,
            tiers,
            analyzer: OptimizationAnalyzer::new(classifier),
        }
    }

    /// Open the RocksDB store and the configured similarity backend.
    pub async fn open(settings: Settings, owners: Arc<dyn OwnerDirectory>) -> Result<Self, EngineError> {
        let db_path = settings.expanded_db_path();
        std::fs::create_dir_all(&db_path)
            .map_err(|e| EngineError::Capacity(format!("cannot create {}: {}", db_path.display(), e)))?;
        let store: Arc<dyn VectorStore> =
            Arc::new(RocksVectorStore::open(&db_path)?.with_max_entries(settings.storage.max_entries));

        let dimension = settings.similarity.dimension;
        let index: Arc<dyn SimilarityIndex> = match settings.similarity.backend {
            SimilarityBackend::Flat => Arc::new(FlatIndex::new(dimension)),
            SimilarityBackend::Hnsw => {
                let config = HnswConfig::new(dimension, settings.expanded_index_path())
                    .with_capacity(settings.similarity.capacity);
                Arc::new(HnswIndex::open_or_create(config)?)
            }
        };

        let vault = Self::new(settings, store, index, owners);
        if vault.index.is_empty() && vault.store.entry_count() > 0 {
            let rebuilt = vault.rebuild_similarity().await?;
            info!(indexed = rebuilt.indexed, "Similarity index rebuilt from store");
        }
        Ok(vault)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.store)
    }

    pub fn index(&self) -> Arc<dyn SimilarityIndex> {
        Arc::clone(&self.index)
    }

    pub fn reaper(&self) -> &OrphanReaper {
        &self.reaper
    }

    pub async fn ingest(&self, owner_id: &str, chunks: Vec<Chunk>) -> Result<IngestResult, EngineError> {
        self.pipeline
            .ingest(owner_id, chunks, &CancellationToken::new())
            .await
    }

    /// Ingest with a cancellation token checked between chunks.
    pub async fn ingest_with_cancel(
        &self,
        owner_id: &str,
        chunks: Vec<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<IngestResult, EngineError> {
        self.pipeline.ingest(owner_id, chunks, cancel).await
    }

    pub async fn query(
        &self,
        scope: OwnerScope,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<QueryHit>, EngineError> {
        self.query.query(scope, vector, top_k).await
    }

    pub async fn release_owner(&self, owner_id: &str) -> Result<ReleaseResult, EngineError> {
        self.reaper.release_owner(owner_id).await
    }

    pub async fn analyze(&self) -> Result<OrphanAnalysis, EngineError> {
        self.reaper.analyze().await
    }

    /// Run a cleanup sweep and drop reclaimed entries from the index.
    pub async fn cleanup(&self, options: CleanupOptions) -> Result<CleanupResult, EngineError> {
        let result = self.reaper.cleanup(options).await?;
        self.forget_vectors(&result);
        Ok(result)
    }

    pub async fn emergency_cleanup(&self) -> Result<CleanupResult, EngineError> {
        let result = self.reaper.emergency_cleanup().await?;
        self.forget_vectors(&result);
        Ok(result)
    }

    fn forget_vectors(&self, result: &CleanupResult) {
        for fingerprint in &result.deleted_fingerprints {
            if let Err(e) = self.index.remove(fingerprint) {
                warn!(fingerprint = %fingerprint.short(), error = %e, "Failed to remove vector");
            }
        }
    }

    /// Aggregate analysis including the current orphan preview.
    pub async fn analysis(&self) -> Result<AnalysisReport, EngineError> {
        let orphans = self.reaper.analyze().await?;
        let store = Arc::clone(&self.store);
        let analyzer = self.analyzer.clone();
        let report =
            tokio::task::spawn_blocking(move || analyzer.analyze_store(store.as_ref(), Some(&orphans)))
                .await??;
        Ok(report)
    }

    pub async fn optimization_report(&self, test_type: ReportType) -> Result<OptimizationReport, EngineError> {
        let analysis = self.analysis().await?;
        Ok(OptimizationReport::from_analysis(test_type, analysis))
    }

    /// Run one tier reclassification pass.
    pub async fn reclassify(&self) -> Result<ReclassifyStats, EngineError> {
        let tiers = Arc::clone(&self.tiers);
        let stats = tokio::task::spawn_blocking(move || tiers.reclassify(Utc::now())).await??;
        let event = AnalyticsEvent::new(AnalyticsKind::Reclassify, Utc::now())
            .with_count(stats.promoted + stats.demoted)
            .with_duration_ms(stats.duration_ms);
        if let Err(e) = self.store.record_analytics(&event) {
            warn!(error = %e, "Failed to record reclassification analytics");
        }
        Ok(stats)
    }

    /// Clear the similarity index and reindex every stored entry.
    pub async fn rebuild_similarity(&self) -> Result<RebuildStats, EngineError> {
        let store = Arc::clone(&self.store);
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || -> Result<RebuildStats, EngineError> {
            index.clear()?;
            let mut stats = RebuildStats::default();
            for item in store.list(EntryFilter::all())? {
                let entry = item?;
                match Compressor::decode_entry(&entry) {
                    Ok(payload) => {
                        index.upsert(entry.fingerprint, &payload.vector)?;
                        stats.indexed += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "Skipping corrupt entry during rebuild");
                        stats.skipped_corrupt += 1;
                    }
                }
            }
            Ok(stats)
        })
        .await?
    }

    pub fn stats(&self) -> Result<VaultStats, EngineError> {
        Ok(VaultStats {
            store: self.store.stats()?,
            index: self.index.stats(),
            metrics: self.metrics.snapshot(),
        })
    }

    pub fn metrics(&self) -> EngineMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn compact(&self) -> Result<(), EngineError> {
        self.store.compact()?;
        Ok(())
    }

    /// Flush the store and persist the similarity index.
    pub fn close(&self) -> Result<(), EngineError> {
        self.store.flush()?;
        self.index.save()?;
        info!("Vault closed");
        Ok(())
    }
}
