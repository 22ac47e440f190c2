//! Similarity query.
//!
//! Ranking is delegated to the similarity index. Every hit is resolved back
//! through the vector store, scoped to the caller's owners, decoded with
//! digest verification and touched (read-through promotion). Entries that
//! fail verification are never returned.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, warn};
use vault_storage::{StorageError, VectorStore};
use vault_types::{AnalyticsEvent, AnalyticsKind, ChunkPayload, Fingerprint, StorageEntry, Tier};
use vault_vector::SimilarityIndex;

use crate::compress::Compressor;
use crate::error::EngineError;
use crate::metrics::EngineMetrics;

/// Which owners' content a query may see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OwnerScope {
    #[default]
    All,
    Owners(HashSet<String>),
}

impl OwnerScope {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        OwnerScope::Owners(HashSet::from([owner_id.into()]))
    }

    pub fn owners<I, S>(owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OwnerScope::Owners(owners.into_iter().map(Into::into).collect())
    }

    /// Owners of the given positions visible under this scope.
    fn visible(&self, positions: Vec<(String, u32)>) -> Vec<String> {
        let mut owners: Vec<String> = positions
            .into_iter()
            .map(|(owner, _)| owner)
            .filter(|owner| match self {
                OwnerScope::All => true,
                OwnerScope::Owners(set) => set.contains(owner),
            })
            .collect();
        owners.dedup();
        owners
    }
}

/// One query result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryHit {
    pub fingerprint: Fingerprint,
    pub score: f32,
    /// Tier after this read
    pub tier: Tier,
    pub reference_count: u64,
    /// Owners in scope that reference this entry
    pub owners: Vec<String>,
    pub payload: ChunkPayload,
    #[serde(skip)]
    pub entry: StorageEntry,
}

/// Resolves similarity hits into verified payloads.
pub struct QueryService {
    store: Arc<dyn VectorStore>,
    index: Arc<dyn SimilarityIndex>,
    metrics: Arc<EngineMetrics>,
    oversample: usize,
}

impl QueryService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        index: Arc<dyn SimilarityIndex>,
        metrics: Arc<EngineMetrics>,
        oversample: usize,
    ) -> Self {
        Self {
            store,
            index,
            metrics,
            oversample: oversample.max(1),
        }
    }

    /// Top `top_k` entries in scope, best first.
    pub async fn query(
        &self,
        scope: OwnerScope,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<QueryHit>, EngineError> {
        if top_k == 0 {
            return Err(EngineError::Validation("top_k must be > 0".into()));
        }
        if vector.len() != self.index.dimension() {
            return Err(EngineError::Validation(format!(
                "query dimension mismatch: expected {}, got {}",
                self.index.dimension(),
                vector.len()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::Validation("query vector contains non-finite values".into()));
        }

        let store = Arc::clone(&self.store);
        let index = Arc::clone(&self.index);
        let metrics = Arc::clone(&self.metrics);
        let oversample = self.oversample;
        let start = Instant::now();

        let hits = tokio::task::spawn_blocking(move || {
            Self::resolve_hits(store.as_ref(), index.as_ref(), &metrics, &scope, &vector, top_k, oversample)
        })
        .await??;

        let duration_ms = start.elapsed().as_millis() as u64;
        EngineMetrics::incr(&self.metrics.queries, 1);
        let event = AnalyticsEvent::new(AnalyticsKind::Query, Utc::now())
            .with_count(hits.len() as u64)
            .with_duration_ms(duration_ms);
        if let Err(e) = self.store.record_analytics(&event) {
            warn!(error = %e, "Failed to record query analytics");
        }
        debug!(top_k, returned = hits.len(), duration_ms, "Query complete");
        Ok(hits)
    }

    fn resolve_hits(
        store: &dyn VectorStore,
        index: &dyn SimilarityIndex,
        metrics: &EngineMetrics,
        scope: &OwnerScope,
        vector: &[f32],
        top_k: usize,
        oversample: usize,
    ) -> Result<Vec<QueryHit>, EngineError> {
        let indexed = index.len();
        let mut k = top_k.saturating_mul(oversample);
        let mut seen: HashSet<Fingerprint> = HashSet::new();
        let mut results = Vec::with_capacity(top_k);

        loop {
            let candidates = index.search(vector, k)?;
            let exhausted = candidates.len() < k || k >= indexed;

            for candidate in candidates {
                if results.len() >= top_k {
                    break;
                }
                if !seen.insert(candidate.fingerprint) {
                    continue;
                }
                let positions = store.references_for_fingerprint(&candidate.fingerprint)?;
                let owners = scope.visible(positions);
                if owners.is_empty() {
                    // Unreferenced or out of scope
                    continue;
                }
                let entry = match store.get(&candidate.fingerprint) {
                    Ok(Some(entry)) => entry,
                    Ok(None) => continue,
                    Err(StorageError::Serialization(reason)) => {
                        EngineMetrics::incr(&metrics.corrupt_reads, 1);
                        error!(fingerprint = %candidate.fingerprint, error = %reason, "Skipping undecodable entry");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let payload = match Compressor::decode_entry(&entry) {
                    Ok(payload) => payload,
                    Err(e) => {
                        EngineMetrics::incr(&metrics.corrupt_reads, 1);
                        error!(fingerprint = %candidate.fingerprint, error = %e, "Refusing to serve corrupt entry");
                        continue;
                    }
                };
                let Some(touched) = store.touch(&candidate.fingerprint, Utc::now())? else {
                    continue;
                };
                if touched.promoted {
                    EngineMetrics::incr(&metrics.promotions, 1);
                    debug!(fingerprint = %candidate.fingerprint.short(), "Promoted to HOT on read");
                }
                results.push(QueryHit {
                    fingerprint: candidate.fingerprint,
                    score: candidate.score,
                    tier: touched.entry.tier,
                    reference_count: touched.entry.reference_count,
                    owners,
                    payload,
                    entry: touched.entry,
                });
            }

            if results.len() >= top_k || exhausted {
                break;
            }
            k = k.saturating_mul(2).min(indexed.max(1));
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use vault_storage::RocksVectorStore;
    use vault_types::{Chunk, IngestConfig};
    use vault_vector::FlatIndex;

    use crate::fingerprint::ContentFingerprinter;
    use crate::pipeline::IngestionPipeline;
    use crate::test_support::FaultyStore;
    use crate::tier::TierClassifier;

    const DIM: usize = 3;

    struct Fixture {
        _temp: TempDir,
        store: Arc<dyn VectorStore>,
        faulty: Arc<FaultyStore>,
        metrics: Arc<EngineMetrics>,
        pipeline: IngestionPipeline,
        query: QueryService,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let rocks: Arc<dyn VectorStore> = Arc::new(RocksVectorStore::open(temp.path()).unwrap());
        let faulty = Arc::new(FaultyStore::new(rocks));
        let store: Arc<dyn VectorStore> = faulty.clone();
        let index: Arc<dyn SimilarityIndex> = Arc::new(FlatIndex::new(DIM));
        let metrics = Arc::new(EngineMetrics::new());
        let pipeline = IngestionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&index),
            ContentFingerprinter::default(),
            Compressor::default(),
            TierClassifier::default(),
            &IngestConfig::default(),
            Arc::clone(&metrics),
        );
        let query = QueryService::new(Arc::clone(&store), index, Arc::clone(&metrics), 2);
        Fixture {
            _temp: temp,
            store,
            faulty,
            metrics,
            pipeline,
            query,
        }
    }

    async fn seed(f: &Fixture) {
        let cancel = CancellationToken::new();
        f.pipeline
            .ingest(
                "doc-a",
                vec![
                    Chunk::new("x axis", vec![1.0, 0.0, 0.0]),
                    Chunk::new("y axis", vec![0.0, 1.0, 0.0]),
                ],
                &cancel,
            )
            .await
            .unwrap();
        f.pipeline
            .ingest("doc-b", vec![Chunk::new("mostly x", vec![0.9, 0.1, 0.0])], &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_query_ranks_and_decodes() {
        let f = fixture();
        seed(&f).await;
        let hits = f.query.query(OwnerScope::All, vec![1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.text, "x axis");
        assert_eq!(hits[1].payload.text, "mostly x");
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].owners, vec!["doc-a".to_string()]);
    }

    #[tokio::test]
    async fn test_query_respects_owner_scope() {
        let f = fixture();
        seed(&f).await;
        let hits = f
            .query
            .query(OwnerScope::owner("doc-b"), vec![1.0, 0.0, 0.0], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.text, "mostly x");
    }

    #[tokio::test]
    async fn test_query_touches_and_promotes() {
        let f = fixture();
        seed(&f).await;
        let reference = f.store.get_reference("doc-a", 0).unwrap().unwrap();
        f.store
            .update_entry(&reference.fingerprint, &mut |e| {
                e.tier = Tier::Cold;
                e.created_at = Utc::now() - Duration::days(30);
            })
            .unwrap();

        let hits = f.query.query(OwnerScope::All, vec![1.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].fingerprint, reference.fingerprint);
        assert_eq!(hits[0].tier, Tier::Hot);

        let entry = f.store.get(&reference.fingerprint).unwrap().unwrap();
        assert_eq!(entry.tier, Tier::Hot);
        assert_eq!(entry.access.total_reads, 1);
        assert!(entry.promoted_at.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_not_served() {
        let f = fixture();
        seed(&f).await;
        let reference = f.store.get_reference("doc-a", 0).unwrap().unwrap();
        f.store
            .update_entry(&reference.fingerprint, &mut |e| {
                e.payload_digest = "00".repeat(32);
            })
            .unwrap();

        let hits = f.query.query(OwnerScope::All, vec![1.0, 0.0, 0.0], 3).await.unwrap();
        assert!(hits.iter().all(|h| h.fingerprint != reference.fingerprint));
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_skipped() {
        let f = fixture();
        seed(&f).await;
        let reference = f.store.get_reference("doc-a", 0).unwrap().unwrap();
        f.faulty.mark_unreadable(reference.fingerprint);

        let hits = f.query.query(OwnerScope::All, vec![1.0, 0.0, 0.0], 3).await.unwrap();
        assert!(hits.iter().all(|h| h.fingerprint != reference.fingerprint));
        assert_eq!(hits.len(), 2);
        assert_eq!(f.metrics.snapshot().corrupt_reads, 1);
    }

    #[tokio::test]
    async fn test_query_validation() {
        let f = fixture();
        assert!(matches!(
            f.query.query(OwnerScope::All, vec![1.0], 3).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            f.query.query(OwnerScope::All, vec![1.0, 0.0, 0.0], 0).await,
            Err(EngineError::Validation(_))
        ));
        assert!(f
            .query
            .query(OwnerScope::All, vec![1.0, 0.0, 0.0], 3)
            .await
            .unwrap()
            .is_empty());
    }
}
