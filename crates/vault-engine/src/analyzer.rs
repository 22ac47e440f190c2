//! Optimization analysis.
//!
//! Pure aggregation over entries, history and analytics. Nothing here
//! mutates the store, and an empty store yields a valid empty report.
//!
//! Score, out of 100, four pillars of 25:
//! - compression: 25 * min(1, savings / 0.5), savings = 1 - mean ratio
//! - deduplication: 25 * min(1, duplicate_rate / 0.10)
//! - tiering: 25 when every entry has exactly one tier and there is at
//!   least one entry
//! - reporting: 6.25 for each measured group (compression, deduplication,
//!   tiering, activity)

use chrono::{DateTime, Utc};
use serde::Serialize;
use vault_storage::{EntryFilter, VectorStore};
use vault_types::{AnalyticsEvent, AnalyticsKind, ProcessingRecord, StorageEntry};

use crate::error::EngineError;
use crate::reaper::OrphanAnalysis;
use crate::tier::{TierClassifier, TierDistribution};

pub const PILLAR_WEIGHT: f64 = 25.0;
/// Savings at which the compression pillar is full
pub const COMPRESSION_TARGET_SAVINGS: f64 = 0.5;
/// Duplicate rate at which the deduplication pillar is full
pub const DEDUP_TARGET_RATE: f64 = 0.10;

/// Per-pillar scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub compression: f64,
    pub deduplication: f64,
    pub tiering: f64,
    pub reporting: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.compression + self.deduplication + self.tiering + self.reporting
    }
}

/// Throughput and latency derived from history and analytics rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub ingest_batches: u64,
    pub chunks_ingested: u64,
    pub average_batch_ms: f64,
    pub chunks_per_second: f64,
    pub queries: u64,
    pub average_query_ms: f64,
    pub original_bytes: u64,
    pub stored_bytes: u64,
}

/// Aggregated view of the store.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub total_entries: u64,
    pub compressed_entries: u64,
    pub poor_compression_entries: u64,
    /// Mean compressed/original ratio; 1.0 for an empty store
    pub average_compression_ratio: f64,
    pub compression_savings: f64,
    pub total_references: u64,
    pub distinct_referenced: u64,
    /// References resolved to an existing entry instead of a new one
    pub duplicates_detected: u64,
    pub duplicate_rate: f64,
    pub tiers: TierDistribution,
    /// Entries whose tier would change on the next reclassification pass
    pub reclassification_due: u64,
    pub pending_deletion: u64,
    pub history_records: u64,
    pub analytics_events: u64,
    pub orphaned_assignments: Option<u64>,
    pub performance: PerformanceStats,
    pub score: ScoreBreakdown,
    pub total_score: f64,
    pub recommendations: Vec<String>,
}

/// Score and recommendation generator.
#[derive(Debug, Clone, Default)]
pub struct OptimizationAnalyzer {
    classifier: TierClassifier,
}

impl OptimizationAnalyzer {
    pub fn new(classifier: TierClassifier) -> Self {
        Self { classifier }
    }

    /// Read the store and analyze it.
    pub fn analyze_store(
        &self,
        store: &dyn VectorStore,
        orphans: Option<&OrphanAnalysis>,
    ) -> Result<AnalysisReport, EngineError> {
        let entries: Vec<StorageEntry> = store
            .list(EntryFilter::all())?
            .collect::<Result<_, _>>()?;
        let history = store.list_history()?;
        let analytics = store.list_analytics()?;
        Ok(self.analyze(&entries, &history, &analytics, orphans, Utc::now()))
    }

    pub fn analyze(
        &self,
        entries: &[StorageEntry],
        history: &[ProcessingRecord],
        analytics: &[AnalyticsEvent],
        orphans: Option<&OrphanAnalysis>,
        now: DateTime<Utc>,
    ) -> AnalysisReport {
        let mut report = AnalysisReport {
            total_entries: entries.len() as u64,
            history_records: history.len() as u64,
            analytics_events: analytics.len() as u64,
            orphaned_assignments: orphans.map(|o| o.orphaned_assignments),
            ..Default::default()
        };

        let mut ratio_sum = 0.0;
        for entry in entries {
            if entry.is_compressed() {
                report.compressed_entries += 1;
            }
            if entry.compression_ratio >= 0.95 && entry.original_size_bytes > 0 {
                report.poor_compression_entries += 1;
            }
            ratio_sum += entry.compression_ratio;
            report.total_references += entry.reference_count;
            if entry.reference_count > 0 {
                report.distinct_referenced += 1;
            }
            if entry.is_pending_deletion() {
                report.pending_deletion += 1;
            }
            report.tiers.add(entry.tier);
            if self.classifier.classify(entry, now) != entry.tier {
                report.reclassification_due += 1;
            }
        }

        report.average_compression_ratio = if entries.is_empty() {
            1.0
        } else {
            ratio_sum / entries.len() as f64
        };
        report.compression_savings = (1.0 - report.average_compression_ratio).max(0.0);
        report.duplicates_detected = report
            .total_references
            .saturating_sub(report.distinct_referenced);
        report.duplicate_rate = if report.total_references == 0 {
            0.0
        } else {
            1.0 - report.distinct_referenced as f64 / report.total_references as f64
        };
        report.performance = performance(history, analytics);

        report.score = score(&report);
        report.total_score = report.score.total();
        report.recommendations = recommendations(&report);
        report
    }
}

fn performance(history: &[ProcessingRecord], analytics: &[AnalyticsEvent]) -> PerformanceStats {
    let mut stats = PerformanceStats {
        ingest_batches: history.len() as u64,
        ..Default::default()
    };
    let mut batch_ms = 0u64;
    for record in history {
        stats.chunks_ingested += record.chunks_processed;
        stats.original_bytes += record.bytes_original;
        stats.stored_bytes += record.bytes_stored;
        batch_ms += record.duration_ms;
    }
    if !history.is_empty() {
        stats.average_batch_ms = batch_ms as f64 / history.len() as f64;
    }
    if batch_ms > 0 {
        stats.chunks_per_second = stats.chunks_ingested as f64 / (batch_ms as f64 / 1000.0);
    }

    let mut query_ms = 0u64;
    for event in analytics.iter().filter(|e| e.kind == AnalyticsKind::Query) {
        stats.queries += 1;
        query_ms += event.duration_ms;
    }
    if stats.queries > 0 {
        stats.average_query_ms = query_ms as f64 / stats.queries as f64;
    }
    stats
}

fn score(report: &AnalysisReport) -> ScoreBreakdown {
    let has_entries = report.total_entries > 0;
    let compression = if has_entries {
        PILLAR_WEIGHT * (report.compression_savings / COMPRESSION_TARGET_SAVINGS).min(1.0)
    } else {
        0.0
    };
    let deduplication = PILLAR_WEIGHT * (report.duplicate_rate / DEDUP_TARGET_RATE).min(1.0);
    let tiering = if has_entries && report.tiers.is_complete() {
        PILLAR_WEIGHT
    } else {
        0.0
    };

    let measured = [
        has_entries,
        report.total_references > 0,
        report.tiers.total_entries > 0,
        report.history_records + report.analytics_events > 0,
    ];
    let reporting = PILLAR_WEIGHT / 4.0 * measured.iter().filter(|m| **m).count() as f64;

    ScoreBreakdown {
        compression,
        deduplication,
        tiering,
        reporting,
    }
}

fn recommendations(report: &AnalysisReport) -> Vec<String> {
    let mut recs = Vec::new();
    if report.total_entries == 0 {
        recs.push("Store is empty: ingest content before evaluating optimization".to_string());
        return recs;
    }

    let savings_pct = report.compression_savings * 100.0;
    if report.compression_savings > COMPRESSION_TARGET_SAVINGS {
        recs.push(format!("Compression is effective ({:.1}% saved)", savings_pct));
    } else {
        recs.push(format!(
            "Review compression strategy: only {:.1}% saved on average",
            savings_pct
        ));
    }
    if report.poor_compression_entries > 0 {
        recs.push(format!(
            "{} entries compress poorly; consider a different codec for them",
            report.poor_compression_entries
        ));
    }

    if report.duplicate_rate < DEDUP_TARGET_RATE {
        recs.push(format!(
            "Duplicate rate is {:.1}%: review chunk preprocessing and normalization",
            report.duplicate_rate * 100.0
        ));
    }

    if report.tiers.hot_count + report.tiers.cold_count == 0 {
        recs.push("Tier classifier produced no classified entries: check tiering configuration".to_string());
    } else if !report.tiers.is_complete() {
        recs.push("Tier distribution is incomplete: run reclassification".to_string());
    }
    if report.reclassification_due > 0 {
        recs.push(format!(
            "{} entries are due for reclassification",
            report.reclassification_due
        ));
    }

    if let Some(orphaned) = report.orphaned_assignments.filter(|n| *n > 0) {
        recs.push(format!("Run cleanup to remove {} orphaned assignments", orphaned));
    }
    if report.pending_deletion > 0 {
        recs.push(format!(
            "{} entries are pending deletion and will be reclaimed by the next sweep",
            report.pending_deletion
        ));
    }
    recs
}
