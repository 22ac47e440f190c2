//! Engine metrics.
//!
//! `OptimizationMetrics` describes one ingestion batch and is returned to the
//! caller. `EngineMetrics` holds process-lifetime counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use vault_types::{CompressionAlgorithm, Fingerprint};

/// What happened to one chunk of a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChunkOutcome {
    /// Novel content; a new entry was stored
    Stored {
        sequence: u32,
        fingerprint: Fingerprint,
        algorithm: CompressionAlgorithm,
        compression_ratio: f64,
        quality_poor: bool,
        original_size: u64,
        stored_size: u64,
    },
    /// Content already existed; only a reference was written
    Duplicate {
        sequence: u32,
        fingerprint: Fingerprint,
        reference_count: u64,
    },
    Failed {
        sequence: u32,
        error: String,
        /// Resubmitting the chunk may succeed
        retryable: bool,
    },
    /// Not started because the batch was cancelled
    Cancelled { sequence: u32 },
}

impl ChunkOutcome {
    pub fn sequence(&self) -> u32 {
        match self {
            ChunkOutcome::Stored { sequence, .. }
            | ChunkOutcome::Duplicate { sequence, .. }
            | ChunkOutcome::Failed { sequence, .. }
            | ChunkOutcome::Cancelled { sequence } => *sequence,
        }
    }
}

/// Storage-side metrics for one ingestion batch.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationMetrics {
    pub new_entries: u64,
    pub duplicates_detected: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Uncompressed bytes of newly stored payloads
    pub bytes_original: u64,
    /// Stored bytes of newly stored payloads
    pub bytes_stored: u64,
    /// Mean ratio over newly stored payloads; 1.0 when nothing was stored
    pub average_compression_ratio: f64,
    pub poor_compression_count: u64,
    pub chunks: Vec<ChunkOutcome>,
}

impl OptimizationMetrics {
    pub fn from_outcomes(mut chunks: Vec<ChunkOutcome>) -> Self {
        chunks.sort_by_key(ChunkOutcome::sequence);
        let mut metrics = OptimizationMetrics::default();
        let mut ratio_sum = 0.0;
        for outcome in &chunks {
            match outcome {
                ChunkOutcome::Stored {
                    compression_ratio,
                    quality_poor,
                    original_size,
                    stored_size,
                    ..
                } => {
                    metrics.new_entries += 1;
                    metrics.bytes_original += original_size;
                    metrics.bytes_stored += stored_size;
                    ratio_sum += compression_ratio;
                    if *quality_poor {
                        metrics.poor_compression_count += 1;
                    }
                }
                ChunkOutcome::Duplicate { .. } => metrics.duplicates_detected += 1,
                ChunkOutcome::Failed { .. } => metrics.failed += 1,
                ChunkOutcome::Cancelled { .. } => metrics.cancelled += 1,
            }
        }
        metrics.average_compression_ratio = if metrics.new_entries == 0 {
            1.0
        } else {
            ratio_sum / metrics.new_entries as f64
        };
        metrics.chunks = chunks;
        metrics
    }

    /// Chunks that were stored or linked.
    pub fn processed(&self) -> u64 {
        self.new_entries + self.duplicates_detected
    }
}

/// Process-lifetime engine counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub chunks_ingested: AtomicU64,
    pub duplicates_detected: AtomicU64,
    pub chunks_failed: AtomicU64,
    pub entries_created: AtomicU64,
    pub bytes_original: AtomicU64,
    pub bytes_stored: AtomicU64,
    pub registration_races: AtomicU64,
    pub queries: AtomicU64,
    pub promotions: AtomicU64,
    pub corrupt_reads: AtomicU64,
    pub sweeps_completed: AtomicU64,
    pub sweeps_rejected: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self, batch: &OptimizationMetrics) {
        Self::incr(&self.chunks_ingested, batch.processed());
        Self::incr(&self.duplicates_detected, batch.duplicates_detected);
        Self::incr(&self.chunks_failed, batch.failed);
        Self::incr(&self.entries_created, batch.new_entries);
        Self::incr(&self.bytes_original, batch.bytes_original);
        Self::incr(&self.bytes_stored, batch.bytes_stored);
    }

    /// Get all counts as a snapshot.
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            chunks_ingested: self.chunks_ingested.load(Ordering::Relaxed),
            duplicates_detected: self.duplicates_detected.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            entries_created: self.entries_created.load(Ordering::Relaxed),
            bytes_original: self.bytes_original.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
            registration_races: self.registration_races.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            corrupt_reads: self.corrupt_reads.load(Ordering::Relaxed),
            sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
            sweeps_rejected: self.sweeps_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetricsSnapshot {
    pub chunks_ingested: u64,
    pub duplicates_detected: u64,
    pub chunks_failed: u64,
    pub entries_created: u64,
    pub bytes_original: u64,
    pub bytes_stored: u64,
    pub registration_races: u64,
    pub queries: u64,
    pub promotions: u64,
    pub corrupt_reads: u64,
    pub sweeps_completed: u64,
    pub sweeps_rejected: u64,
}

impl EngineMetricsSnapshot {
    /// Stored / original over everything this process ingested.
    pub fn lifetime_compression_ratio(&self) -> f64 {
        if self.bytes_original == 0 {
            1.0
        } else {
            self.bytes_stored as f64 / self.bytes_original as f64
        }
    }
}
