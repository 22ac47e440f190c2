//! Four-pillar optimization report.
//!
//! Downstream tooling scores against this shape, so every report carries all
//! four pillars (`compression`, `deduplication`, `tieredStorage`,
//! `analytics`) whatever its type. The report type selects which pillars
//! decide `summary.success`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyzer::{AnalysisReport, PerformanceStats, PILLAR_WEIGHT};
use crate::error::EngineError;

/// Which pillars a report is judged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Full,
    Compression,
    Deduplication,
    Tiering,
    Analytics,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Full => "full",
            ReportType::Compression => "compression",
            ReportType::Deduplication => "deduplication",
            ReportType::Tiering => "tiering",
            ReportType::Analytics => "analytics",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" | "all" => Ok(ReportType::Full),
            "compression" => Ok(ReportType::Compression),
            "deduplication" | "dedup" => Ok(ReportType::Deduplication),
            "tiering" | "tiered-storage" | "tieredstorage" => Ok(ReportType::Tiering),
            "analytics" => Ok(ReportType::Analytics),
            other => Err(EngineError::Validation(format!("unknown report type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionFeature {
    pub enabled: bool,
    pub total_entries: u64,
    pub compressed_entries: u64,
    pub poor_compression_entries: u64,
    pub average_compression_ratio: f64,
    pub savings_percent: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationFeature {
    pub enabled: bool,
    pub total_references: u64,
    pub distinct_entries: u64,
    pub duplicates_detected: u64,
    pub duplicate_rate: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TieredStorageFeature {
    pub enabled: bool,
    pub hot_count: u64,
    pub cold_count: u64,
    pub total_entries: u64,
    pub complete: bool,
    pub reclassification_due: u64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsFeature {
    pub enabled: bool,
    pub history_records: u64,
    pub analytics_events: u64,
    pub pending_deletion: u64,
    pub orphaned_assignments: Option<u64>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationFeatures {
    pub compression: CompressionFeature,
    pub deduplication: DeduplicationFeature,
    pub tiered_storage: TieredStorageFeature,
    pub analytics: AnalyticsFeature,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub success: bool,
    /// 0 to 100
    pub score: f64,
    pub recommendations: Vec<String>,
}

/// The full report document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub test_type: ReportType,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub generated_at: DateTime<Utc>,
    pub optimization_features: OptimizationFeatures,
    pub performance: PerformanceStats,
    pub summary: ReportSummary,
}

impl OptimizationReport {
    /// Shape an analysis into the four-pillar document.
    pub fn from_analysis(test_type: ReportType, analysis: AnalysisReport) -> Self {
        let score = analysis.score;
        let features = OptimizationFeatures {
            compression: CompressionFeature {
                enabled: true,
                total_entries: analysis.total_entries,
                compressed_entries: analysis.compressed_entries,
                poor_compression_entries: analysis.poor_compression_entries,
                average_compression_ratio: analysis.average_compression_ratio,
                savings_percent: analysis.compression_savings * 100.0,
                score: score.compression,
            },
            deduplication: DeduplicationFeature {
                enabled: true,
                total_references: analysis.total_references,
                distinct_entries: analysis.distinct_referenced,
                duplicates_detected: analysis.duplicates_detected,
                duplicate_rate: analysis.duplicate_rate,
                score: score.deduplication,
            },
            tiered_storage: TieredStorageFeature {
                enabled: true,
                hot_count: analysis.tiers.hot_count,
                cold_count: analysis.tiers.cold_count,
                total_entries: analysis.tiers.total_entries,
                complete: analysis.tiers.is_complete(),
                reclassification_due: analysis.reclassification_due,
                score: score.tiering,
            },
            analytics: AnalyticsFeature {
                enabled: true,
                history_records: analysis.history_records,
                analytics_events: analysis.analytics_events,
                pending_deletion: analysis.pending_deletion,
                orphaned_assignments: analysis.orphaned_assignments,
                score: score.reporting,
            },
        };

        // A pillar passes at half its weight
        let pass = |pillar: f64| pillar >= PILLAR_WEIGHT / 2.0;
        let success = match test_type {
            ReportType::Full => analysis.total_score >= 2.0 * PILLAR_WEIGHT,
            ReportType::Compression => pass(score.compression),
            ReportType::Deduplication => pass(score.deduplication),
            ReportType::Tiering => pass(score.tiering),
            ReportType::Analytics => pass(score.reporting),
        };

        Self {
            test_type,
            generated_at: Utc::now(),
            optimization_features: features,
            performance: analysis.performance,
            summary: ReportSummary {
                success,
                score: analysis.total_score,
                recommendations: analysis.recommendations,
            },
        }
    }
}
