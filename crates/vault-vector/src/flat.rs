//! Exact brute-force cosine index.
//!
//! Vectors are normalized on insert so a search is one dot product per
//! entry. Suitable for small corpora and tests; results are exact.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use vault_types::Fingerprint;

use crate::error::VectorError;
use crate::index::{check_dimension, IndexStats, SearchHit, SimilarityIndex};

/// In-memory exact cosine index.
pub struct FlatIndex {
    dimension: usize,
    vectors: DashMap<Fingerprint, Arc<[f32]>>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: DashMap::new(),
        }
    }
}

fn normalize(vector: &[f32]) -> Arc<[f32]> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return Arc::from(vector);
    }
    vector.iter().map(|v| v / norm).collect()
}

impl SimilarityIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn upsert(&self, fingerprint: Fingerprint, vector: &[f32]) -> Result<(), VectorError> {
        check_dimension(self.dimension, vector)?;
        self.vectors.insert(fingerprint, normalize(vector));
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, VectorError> {
        check_dimension(self.dimension, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = normalize(query);

        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .map(|item| {
                let score = item
                    .value()
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                SearchHit::new(*item.key(), score)
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        hits.truncate(k);
        debug!(k = k, found = hits.len(), "Flat search complete");
        Ok(hits)
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<bool, VectorError> {
        Ok(self.vectors.remove(fingerprint).is_some())
    }

    fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.vectors.contains_key(fingerprint)
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            vector_count: self.vectors.len(),
            dimension: self.dimension,
            size_bytes: 0,
            backend: "flat",
        }
    }

    fn save(&self) -> Result<(), VectorError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), VectorError> {
        self.vectors.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::from_bytes([n; 32])
    }

    #[test]
    fn test_exact_ranking() {
        let index = FlatIndex::new(3);
        index.upsert(fp(1), &[1.0, 0.0, 0.0]).unwrap();
        index.upsert(fp(2), &[0.7, 0.7, 0.0]).unwrap();
        index.upsert(fp(3), &[0.0, 0.0, 1.0]).unwrap();

        let hits = index.search(&[2.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].fingerprint, fp(1));
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert_eq!(hits[1].fingerprint, fp(2));
    }

    #[test]
    fn test_upsert_replaces() {
        let index = FlatIndex::new(2);
        index.upsert(fp(1), &[1.0, 0.0]).unwrap();
        index.upsert(fp(1), &[0.0, 1.0]).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.search(&[0.0, 1.0], 1).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_remove_and_clear() {
        let index = FlatIndex::new(2);
        index.upsert(fp(1), &[1.0, 0.0]).unwrap();
        index.upsert(fp(2), &[0.0, 1.0]).unwrap();
        assert!(index.remove(&fp(1)).unwrap());
        assert!(!index.remove(&fp(1)).unwrap());
        assert!(!index.contains(&fp(1)));
        index.clear().unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = FlatIndex::new(4);
        assert!(matches!(
            index.upsert(fp(1), &[1.0]),
            Err(VectorError::DimensionMismatch { expected: 4, actual: 1 })
        ));
        assert!(index.search(&[1.0, 2.0], 1).is_err());
    }
}
