//! # vault-engine
//!
//! Storage optimization and lifecycle engine for knowledge vectors.
//!
//! Ingested chunks flow through fingerprint, dedupe, compress, classify and
//! persist. Duplicates only add owner references. Entries move between HOT
//! and COLD tiers by access pattern, and the orphan reaper reclaims entries
//! whose owners are gone using a mark-then-sweep cycle.
//!
//! `VectorVault` is the entry point:
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), vault_engine::EngineError> {
//! use std::sync::Arc;
//! use vault_engine::{InMemoryOwnerDirectory, VectorVault};
//! use vault_types::{Chunk, Settings};
//!
//! let owners = Arc::new(InMemoryOwnerDirectory::with_owners(["doc-1"]));
//! let vault = VectorVault::open(Settings::default(), owners).await?;
//! let chunk = Chunk::new("hello", vec![0.0; 384]);
//! let result = vault.ingest("doc-1", vec![chunk]).await?;
//! assert_eq!(result.processed, 1);
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod compress;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod owners;
pub mod pipeline;
pub mod query;
pub mod reaper;
pub mod report;
pub mod tier;
pub mod vault;

#[cfg(test)]
mod test_support;

pub use analyzer::{AnalysisReport, OptimizationAnalyzer, PerformanceStats, ScoreBreakdown};
pub use compress::{Compressed, Compressor};
pub use dedup::{DeduplicationIndex, Registration};
pub use error::EngineError;
pub use fingerprint::ContentFingerprinter;
pub use metrics::{ChunkOutcome, EngineMetrics, EngineMetricsSnapshot, OptimizationMetrics};
pub use owners::{FileOwnerDirectory, InMemoryOwnerDirectory, OwnerDirectory};
pub use pipeline::{IngestResult, IngestionPipeline};
pub use query::{OwnerScope, QueryHit, QueryService};
pub use reaper::{
    CleanupOptions, CleanupResult, OrphanAnalysis, OrphanReaper, ReleaseResult, SweepPhase,
};
pub use report::{OptimizationReport, ReportType};
pub use tier::{ReclassifyStats, TierClassifier, TierDistribution, TierManager};
pub use vault::{RebuildStats, VaultStats, VectorVault};
