//! Ingestion pipeline.
//!
//! Per chunk: validate, fingerprint, resolve, compress and register on a
//! miss, then link the owner reference. Chunks of a batch run concurrently
//! and may finish out of order; the batch result is only returned once all
//! of them are done.
//!
//! A reference is written in the same atomic write that increments its
//! entry, so a cancelled or failed chunk never leaves a counted reference
//! behind.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vault_storage::{LinkOutcome, VectorStore};
use vault_types::{
    validate_owner_id, AnalyticsEvent, AnalyticsKind, Chunk, ChunkPayload, Fingerprint,
    IngestConfig, OwnerReference, ProcessingRecord, StorageEntry,
};
use vault_vector::SimilarityIndex;

use crate::compress::{payload_digest, Compressor};
use crate::dedup::{DeduplicationIndex, Registration};
use crate::error::EngineError;
use crate::fingerprint::ContentFingerprinter;
use crate::metrics::{ChunkOutcome, EngineMetrics, OptimizationMetrics};
use crate::tier::TierClassifier;

/// Result of one `ingest` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub owner_id: String,
    /// Chunks stored or linked
    pub processed: u64,
    pub duplicates_detected: u64,
    pub failed: u64,
    pub cancelled: bool,
    /// References past the new chunk count that were released
    pub superseded: u64,
    pub storage_result: OptimizationMetrics,
    pub duration_ms: u64,
}

/// Per-chunk worker. Synchronous; runs on the blocking pool.
struct ChunkProcessor {
    store: Arc<dyn VectorStore>,
    index: Arc<dyn SimilarityIndex>,
    dedup: DeduplicationIndex,
    fingerprinter: ContentFingerprinter,
    compressor: Compressor,
    classifier: TierClassifier,
    max_text_bytes: usize,
    max_link_attempts: u32,
}

impl ChunkProcessor {
    fn process(&self, owner_id: &str, sequence: u32, chunk: Chunk) -> ChunkOutcome {
        match self.try_process(owner_id, sequence, chunk) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(owner_id = %owner_id, sequence, error = %e, "Chunk failed");
                ChunkOutcome::Failed {
                    sequence,
                    retryable: e.is_retryable(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn try_process(
        &self,
        owner_id: &str,
        sequence: u32,
        chunk: Chunk,
    ) -> Result<ChunkOutcome, EngineError> {
        chunk.validate(self.max_text_bytes, Some(self.index.dimension()))?;
        let fingerprint = self.fingerprinter.fingerprint_chunk(&chunk);
        let vector = chunk.vector.clone();
        let payload = chunk.into_payload();
        let mut prepared: Option<StorageEntry> = None;

        for attempt in 1..=self.max_link_attempts {
            let created = match self.dedup.resolve(&fingerprint)? {
                Some(_) => None,
                None => {
                    let entry = match prepared.take() {
                        Some(entry) => entry,
                        None => self.build_entry(fingerprint, &payload)?,
                    };
                    match self.dedup.register(entry.clone())? {
                        Registration::Created(entry) => Some(entry),
                        Registration::Resolved(_) => {
                            prepared = Some(entry);
                            None
                        }
                    }
                }
            };

            let reference = OwnerReference::new(owner_id, sequence, fingerprint);
            let reference_count = match self.store.link_reference(&reference)? {
                LinkOutcome::EntryMissing => {
                    // Reaped between resolve and link
                    debug!(fingerprint = %fingerprint.short(), attempt, "Entry vanished before link, retrying");
                    prepared = created.or(prepared);
                    continue;
                }
                LinkOutcome::Linked { reference_count }
                | LinkOutcome::Unchanged { reference_count } => reference_count,
                LinkOutcome::Relinked {
                    previous,
                    reference_count,
                    previous_marked,
                } => {
                    debug!(
                        owner_id = %owner_id,
                        sequence,
                        previous = %previous.short(),
                        previous_marked,
                        "Position relinked to new content"
                    );
                    reference_count
                }
            };

            if created.is_some() || !self.index.contains(&fingerprint) {
                if let Err(e) = self.index.upsert(fingerprint, &vector) {
                    warn!(fingerprint = %fingerprint.short(), error = %e, "Failed to index vector");
                }
            }

            return Ok(match created {
                Some(entry) => {
                    debug!(
                        fingerprint = %fingerprint.short(),
                        algorithm = %entry.algorithm,
                        ratio = entry.compression_ratio,
                        "Stored new entry"
                    );
                    ChunkOutcome::Stored {
                        sequence,
                        fingerprint,
                        algorithm: entry.algorithm,
                        compression_ratio: entry.compression_ratio,
                        quality_poor: entry.compression_ratio >= 0.95,
                        original_size: entry.original_size_bytes,
                        stored_size: entry.stored_size_bytes(),
                    }
                }
                None => ChunkOutcome::Duplicate {
                    sequence,
                    fingerprint,
                    reference_count,
                },
            });
        }

        Err(EngineError::ConcurrencyConflict(fingerprint.to_hex()))
    }

    fn build_entry(
        &self,
        fingerprint: Fingerprint,
        payload: &ChunkPayload,
    ) -> Result<StorageEntry, EngineError> {
        let raw = payload
            .to_bytes()
            .map_err(|e| EngineError::Validation(format!("payload encode: {}", e)))?;
        let compressed = self.compressor.compress(&raw);
        let now = Utc::now();
        let entry = StorageEntry::new(
            fingerprint,
            compressed.bytes,
            compressed.algorithm,
            compressed.ratio,
            raw.len() as u64,
            payload_digest(&raw),
            now,
        );
        let tier = self.classifier.classify(&entry, now);
        Ok(entry.with_tier(tier))
    }
}

/// Orchestrates batch ingestion.
pub struct IngestionPipeline {
    processor: Arc<ChunkProcessor>,
    store: Arc<dyn VectorStore>,
    metrics: Arc<EngineMetrics>,
    concurrency: usize,
    max_chunks_per_batch: usize,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn VectorStore>,
        index: Arc<dyn SimilarityIndex>,
        fingerprinter: ContentFingerprinter,
        compressor: Compressor,
        classifier: TierClassifier,
        config: &IngestConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let processor = ChunkProcessor {
            store: Arc::clone(&store),
            index,
            dedup: DeduplicationIndex::new(Arc::clone(&store), Arc::clone(&metrics)),
            fingerprinter,
            compressor,
            classifier,
            max_text_bytes: config.max_text_bytes,
            max_link_attempts: config.max_link_attempts.max(1),
        };
        Self {
            processor: Arc::new(processor),
            store,
            metrics,
            concurrency: config.concurrency.max(1),
            max_chunks_per_batch: config.max_chunks_per_batch,
        }
    }

    /// Ingest all chunks of one owner. Chunk `i` is stored at sequence `i`.
    ///
    /// Invalid or failing chunks are reported per chunk; only batch-level
    /// problems (bad owner id, empty or oversized batch) fail the call.
    pub async fn ingest(
        &self,
        owner_id: &str,
        chunks: Vec<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<IngestResult, EngineError> {
        validate_owner_id(owner_id)?;
        if chunks.is_empty() {
            return Err(EngineError::Validation("batch has no chunks".into()));
        }
        if chunks.len() > self.max_chunks_per_batch {
            return Err(EngineError::Validation(format!(
                "batch has {} chunks, max is {}",
                chunks.len(),
                self.max_chunks_per_batch
            )));
        }

        let start = Instant::now();
        let chunk_count = chunks.len() as u32;
        let outcomes: Vec<ChunkOutcome> = stream::iter(chunks.into_iter().enumerate())
            .map(|(i, chunk)| {
                let processor = Arc::clone(&self.processor);
                let owner = owner_id.to_string();
                let sequence = i as u32;
                async move {
                    // Cancellation is honored between chunks, never mid-chunk
                    if cancel.is_cancelled() {
                        return ChunkOutcome::Cancelled { sequence };
                    }
                    match tokio::task::spawn_blocking(move || {
                        processor.process(&owner, sequence, chunk)
                    })
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(e) => ChunkOutcome::Failed {
                            sequence,
                            error: format!("chunk task failed: {}", e),
                            retryable: true,
                        },
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let storage_result = OptimizationMetrics::from_outcomes(outcomes);
        let cancelled = storage_result.cancelled > 0;

        let superseded = if storage_result.failed == 0 && !cancelled {
            self.release_trailing(owner_id, chunk_count).await?
        } else {
            0
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        self.record(owner_id, &storage_result, duration_ms).await;
        self.metrics.record_batch(&storage_result);

        info!(
            owner_id = %owner_id,
            processed = storage_result.processed(),
            duplicates = storage_result.duplicates_detected,
            failed = storage_result.failed,
            cancelled = storage_result.cancelled,
            superseded,
            duration_ms,
            "Ingestion batch complete"
        );

        Ok(IngestResult {
            owner_id: owner_id.to_string(),
            processed: storage_result.processed(),
            duplicates_detected: storage_result.duplicates_detected,
            failed: storage_result.failed,
            cancelled,
            superseded,
            storage_result,
            duration_ms,
        })
    }

    /// Release references at positions the new batch no longer covers.
    async fn release_trailing(&self, owner_id: &str, chunk_count: u32) -> Result<u64, EngineError> {
        let store = Arc::clone(&self.store);
        let owner = owner_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<u64, EngineError> {
            let mut released = 0;
            for reference in store.references_for_owner(&owner)? {
                if reference.sequence < chunk_count {
                    continue;
                }
                if store.unlink_reference(&owner, reference.sequence)?.is_some() {
                    released += 1;
                }
            }
            Ok(released)
        })
        .await?
    }

    /// History and analytics rows are informational; failures only warn.
    async fn record(&self, owner_id: &str, batch: &OptimizationMetrics, duration_ms: u64) {
        let now = Utc::now();
        let mut record = ProcessingRecord::new(owner_id, now);
        record.chunks_processed = batch.processed();
        record.duplicates_detected = batch.duplicates_detected;
        record.chunks_failed = batch.failed;
        record.bytes_original = batch.bytes_original;
        record.bytes_stored = batch.bytes_stored;
        record.duration_ms = duration_ms;
        let event = AnalyticsEvent::new(AnalyticsKind::Ingest, now)
            .with_owner(owner_id)
            .with_count(batch.processed())
            .with_duration_ms(duration_ms);

        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || {
            store.record_history(&record)?;
            store.record_analytics(&event)
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(owner_id = %owner_id, error = %e, "Failed to record ingestion history"),
            Err(e) => warn!(owner_id = %owner_id, error = %e, "History task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vault_storage::RocksVectorStore;
    use vault_types::{CompressionConfig, ChunkMetadata};
    use vault_vector::FlatIndex;

    const DIM: usize = 4;

    struct Fixture {
        _temp: TempDir,
        store: Arc<dyn VectorStore>,
        index: Arc<dyn SimilarityIndex>,
        pipeline: IngestionPipeline,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(RocksVectorStore::open(temp.path()).unwrap());
        let index: Arc<dyn SimilarityIndex> = Arc::new(FlatIndex::new(DIM));
        let pipeline = IngestionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&index),
            ContentFingerprinter::default(),
            Compressor::new(&CompressionConfig::default()),
            TierClassifier::default(),
            &IngestConfig::default(),
            Arc::new(EngineMetrics::new()),
        );
        Fixture {
            _temp: temp,
            store,
            index,
            pipeline,
        }
    }

    fn chunk(text: &str) -> Chunk {
        let seed = text.len() as f32;
        Chunk::new(text, vec![seed, 1.0, 0.5, 0.25])
    }

    #[tokio::test]
    async fn test_ingest_new_chunks() {
        let f = fixture();
        let result = f
            .pipeline
            .ingest(
                "doc-1",
                vec![chunk("alpha text"), chunk("beta text is longer")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.processed, 2);
        assert_eq!(result.duplicates_detected, 0);
        assert_eq!(result.storage_result.new_entries, 2);
        assert_eq!(f.store.entry_count(), 2);
        assert_eq!(f.index.len(), 2);
        assert_eq!(f.store.references_for_owner("doc-1").unwrap().len(), 2);
        assert_eq!(f.store.list_history().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_intra_batch_duplicates() {
        let f = fixture();
        let mut chunks: Vec<Chunk> = (0..10).map(|i| chunk(&format!("distinct chunk {}", i))).collect();
        chunks.push(chunk("distinct chunk 1"));
        chunks.push(chunk("Distinct   chunk 4"));
        chunks.push(chunk("distinct chunk 7\n"));

        let result = f
            .pipeline
            .ingest("doc-1", chunks, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.processed, 13);
        assert_eq!(result.duplicates_detected, 3);
        assert_eq!(f.store.entry_count(), 10);
    }

    #[tokio::test]
    async fn test_reingest_same_owner_is_idempotent() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.pipeline.ingest("doc-1", vec![chunk("same")], &cancel).await.unwrap();
        let again = f.pipeline.ingest("doc-1", vec![chunk("same")], &cancel).await.unwrap();
        assert_eq!(again.duplicates_detected, 1);

        let other = f.pipeline.ingest("doc-2", vec![chunk("same")], &cancel).await.unwrap();
        assert_eq!(other.duplicates_detected, 1);

        let entries: Vec<_> = f
            .store
            .list(vault_storage::EntryFilter::all())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reference_count, 2);
    }

    #[tokio::test]
    async fn test_invalid_chunk_fails_alone() {
        let f = fixture();
        let result = f
            .pipeline
            .ingest(
                "doc-1",
                vec![
                    chunk("good chunk"),
                    Chunk::new("wrong dimension", vec![1.0]),
                    Chunk::new("   ", vec![0.0; DIM]),
                ],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.processed, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(f.store.entry_count(), 1);
        assert!(matches!(
            result.storage_result.chunks[1],
            ChunkOutcome::Failed { retryable: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_batch_level_validation() {
        let f = fixture();
        let cancel = CancellationToken::new();
        assert!(matches!(
            f.pipeline.ingest("doc-1", vec![], &cancel).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            f.pipeline.ingest("bad:owner", vec![chunk("x")], &cancel).await,
            Err(EngineError::Validation(_))
        ));
        assert_eq!(f.store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_batch_writes_nothing() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = f
            .pipeline
            .ingest("doc-1", vec![chunk("one"), chunk("two")], &cancel)
            .await
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.processed, 0);
        assert_eq!(result.storage_result.cancelled, 2);
        assert_eq!(f.store.entry_count(), 0);
        assert!(f.store.references_for_owner("doc-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reingest_supersedes_trailing_positions() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.pipeline
            .ingest("doc-1", vec![chunk("a"), chunk("bb"), chunk("ccc")], &cancel)
            .await
            .unwrap();
        let result = f
            .pipeline
            .ingest("doc-1", vec![chunk("a"), chunk("dddd")], &cancel)
            .await
            .unwrap();
        assert_eq!(result.superseded, 1);
        assert_eq!(result.duplicates_detected, 1);
        assert_eq!(result.storage_result.new_entries, 1);

        let refs = f.store.references_for_owner("doc-1").unwrap();
        assert_eq!(refs.len(), 2);
        // "bb" and "ccc" lost their only reference and wait for the reaper
        let pending = f
            .store
            .list(vault_storage::EntryFilter::pending())
            .unwrap()
            .count();
        assert_eq!(pending, 2);
    }

    #[tokio::test]
    async fn test_metadata_survives_storage() {
        let f = fixture();
        let meta = ChunkMetadata::new().with("page", 3i64).with("lang", "en");
        f.pipeline
            .ingest(
                "doc-1",
                vec![chunk("with metadata").with_metadata(meta.clone())],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let reference = f.store.get_reference("doc-1", 0).unwrap().unwrap();
        let entry = f.store.get(&reference.fingerprint).unwrap().unwrap();
        let payload = Compressor::decode_entry(&entry).unwrap();
        assert_eq!(payload.metadata, meta);
        assert_eq!(payload.text, "with metadata");
    }
}
