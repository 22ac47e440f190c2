//! Similarity index trait and types.
//!
//! Defines the interface for vector similarity search keyed by fingerprint.

use serde::Serialize;
use vault_types::Fingerprint;

use crate::error::VectorError;

/// One similarity search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub fingerprint: Fingerprint,
    /// Cosine similarity, higher is more similar
    pub score: f32,
}

impl SearchHit {
    pub fn new(fingerprint: Fingerprint, score: f32) -> Self {
        Self { fingerprint, score }
    }
}

/// Index statistics
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Number of vectors in the index
    pub vector_count: usize,
    /// Embedding dimension
    pub dimension: usize,
    /// Index file size in bytes (0 for in-memory backends)
    pub size_bytes: u64,
    /// Backend name
    pub backend: &'static str,
}

/// Trait for similarity indexes.
///
/// Implementations use interior mutability and must be safe to share across
/// ingestion, query and maintenance tasks.
pub trait SimilarityIndex: Send + Sync {
    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the number of vectors in the index
    fn len(&self) -> usize;

    /// Check if the index is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace the vector for a fingerprint.
    fn upsert(&self, fingerprint: Fingerprint, vector: &[f32]) -> Result<(), VectorError>;

    /// Search for k nearest neighbors.
    /// Returns hits sorted by similarity (best first).
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, VectorError>;

    /// Remove the vector of a fingerprint.
    fn remove(&self, fingerprint: &Fingerprint) -> Result<bool, VectorError>;

    /// Check if a fingerprint is indexed
    fn contains(&self, fingerprint: &Fingerprint) -> bool;

    /// Get index statistics
    fn stats(&self) -> IndexStats;

    /// Persist the index (no-op for in-memory backends)
    fn save(&self) -> Result<(), VectorError>;

    /// Remove all vectors
    fn clear(&self) -> Result<(), VectorError>;
}

/// Reject vectors whose length differs from the index dimension.
pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), VectorError> {
    if vector.len() != expected {
        return Err(VectorError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}
