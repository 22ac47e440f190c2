//! HNSW index implementation using usearch.
//!
//! usearch keys are `u64`, so each fingerprint is mapped to its
//! `index_key()` and the reverse map is persisted next to the graph.
//!
//! Parameters tuned for quality over speed:
//! - M = 16 (connections per layer)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 100 (search-time quality)

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};
use vault_types::Fingerprint;

use crate::error::VectorError;
use crate::index::{check_dimension, IndexStats, SearchHit, SimilarityIndex};

const INDEX_FILE: &str = "hnsw.usearch";
const KEYS_FILE: &str = "keys.json";

/// HNSW index configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Embedding dimension
    pub dimension: usize,
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
    /// Directory holding the graph and key map
    pub index_path: PathBuf,
    /// Initial capacity (grown on demand)
    pub capacity: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            connectivity: 16,
            expansion_add: 200,
            expansion_search: 100,
            index_path: PathBuf::from("./similarity-index"),
            capacity: 100_000,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize, index_path: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            index_path: index_path.into(),
            ..Default::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn options(&self) -> IndexOptions {
        IndexOptions {
            dimensions: self.dimension,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            multi: false,
        }
    }
}

struct Inner {
    index: Index,
    keys: HashMap<u64, Fingerprint>,
}

/// HNSW index wrapper around usearch.
pub struct HnswIndex {
    inner: RwLock<Inner>,
    config: HnswConfig,
}

fn index_err(e: impl std::fmt::Display) -> VectorError {
    VectorError::Index(e.to_string())
}

impl HnswIndex {
    /// Create a new HNSW index or open an existing one.
    pub fn open_or_create(config: HnswConfig) -> Result<Self, VectorError> {
        let index_file = config.index_path.join(INDEX_FILE);
        let keys_file = config.index_path.join(KEYS_FILE);

        let index = Index::new(&config.options()).map_err(index_err)?;
        let keys = if index_file.exists() {
            info!(path = ?index_file, "Opening existing similarity index");
            index
                .load(path_str(&index_file)?)
                .map_err(|e| VectorError::Index(format!("Failed to load: {}", e)))?;
            let fingerprints: Vec<Fingerprint> = match std::fs::read(&keys_file) {
                Ok(bytes) => serde_json::from_slice(&bytes)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            fingerprints.into_iter().map(|fp| (fp.index_key(), fp)).collect()
        } else {
            info!(path = ?index_file, dim = config.dimension, "Creating new similarity index");
            std::fs::create_dir_all(&config.index_path)?;
            index.reserve(config.capacity).map_err(index_err)?;
            HashMap::new()
        };

        Ok(Self {
            inner: RwLock::new(Inner { index, keys }),
            config,
        })
    }

    /// Get the index file path
    pub fn index_file(&self) -> PathBuf {
        self.config.index_path.join(INDEX_FILE)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, VectorError> {
        self.inner
            .read()
            .map_err(|_| VectorError::Index("index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, VectorError> {
        self.inner
            .write()
            .map_err(|_| VectorError::Index("index lock poisoned".to_string()))
    }
}

fn path_str(path: &std::path::Path) -> Result<&str, VectorError> {
    path.to_str()
        .ok_or_else(|| VectorError::Index("Invalid path encoding".to_string()))
}

impl SimilarityIndex for HnswIndex {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn len(&self) -> usize {
        self.read().map(|inner| inner.index.size()).unwrap_or(0)
    }

    fn upsert(&self, fingerprint: Fingerprint, vector: &[f32]) -> Result<(), VectorError> {
        check_dimension(self.config.dimension, vector)?;
        let key = fingerprint.index_key();
        let mut inner = self.write()?;

        match inner.keys.get(&key) {
            Some(existing) if *existing != fingerprint => return Err(VectorError::KeyCollision(key)),
            Some(_) => {
                inner.index.remove(key).map_err(index_err)?;
            }
            None => {}
        }

        let needed = inner.index.size() + 1;
        if needed > inner.index.capacity() {
            let grown = (inner.index.capacity() * 2).max(needed).max(16);
            inner.index.reserve(grown).map_err(index_err)?;
        }
        inner.index.add(key, vector).map_err(index_err)?;
        inner.keys.insert(key, fingerprint);

        debug!(fingerprint = %fingerprint.short(), "Indexed vector");
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, VectorError> {
        check_dimension(self.config.dimension, query)?;
        let inner = self.read()?;
        if k == 0 || inner.index.size() == 0 {
            return Ok(Vec::new());
        }
        let results = inner.index.search(query, k).map_err(index_err)?;

        let hits: Vec<SearchHit> = results
            .keys
            .iter()
            .zip(results.distances.iter())
            .filter_map(|(key, dist)| {
                inner
                    .keys
                    .get(key)
                    .map(|fp| SearchHit::new(*fp, 1.0 - dist)) // distance to similarity
            })
            .collect();

        debug!(k = k, found = hits.len(), "HNSW search complete");
        Ok(hits)
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<bool, VectorError> {
        let key = fingerprint.index_key();
        let mut inner = self.write()?;
        if inner.keys.get(&key) != Some(fingerprint) {
            return Ok(false);
        }
        let removed = inner.index.remove(key).map_err(index_err)?;
        inner.keys.remove(&key);
        Ok(removed > 0)
    }

    fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.read()
            .map(|inner| inner.keys.get(&fingerprint.index_key()) == Some(fingerprint))
            .unwrap_or(false)
    }

    fn stats(&self) -> IndexStats {
        let size_bytes = std::fs::metadata(self.index_file())
            .map(|m| m.len())
            .unwrap_or(0);
        IndexStats {
            vector_count: self.len(),
            dimension: self.config.dimension,
            size_bytes,
            backend: "hnsw",
        }
    }

    fn save(&self) -> Result<(), VectorError> {
        let inner = self.read()?;
        let path = self.index_file();
        inner
            .index
            .save(path_str(&path)?)
            .map_err(|e| VectorError::Index(format!("Failed to save: {}", e)))?;

        let fingerprints: Vec<&Fingerprint> = inner.keys.values().collect();
        std::fs::write(
            self.config.index_path.join(KEYS_FILE),
            serde_json::to_vec(&fingerprints)?,
        )?;

        info!(path = ?path, vectors = inner.index.size(), "Saved similarity index");
        Ok(())
    }

    fn clear(&self) -> Result<(), VectorError> {
        let index = Index::new(&self.config.options()).map_err(index_err)?;
        index.reserve(self.config.capacity).map_err(index_err)?;
        let mut inner = self.write()?;
        inner.index = index;
        inner.keys.clear();
        info!("Cleared similarity index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn random_vector(dim: usize) -> Vec<f32> {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..dim).map(|_| rng.random()).collect()
    }

    fn fp(n: u8) -> Fingerprint {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        bytes[31] = n;
        Fingerprint::from_bytes(bytes)
    }

    #[test]
    fn test_create_index() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(64, temp.path())).unwrap();
        assert_eq!(index.dimension(), 64);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_upsert_and_search() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::new(32, temp.path()).with_capacity(16);
        let index = HnswIndex::open_or_create(config).unwrap();

        for i in 0..10 {
            index.upsert(fp(i), &random_vector(32)).unwrap();
        }
        assert_eq!(index.len(), 10);

        let probe = random_vector(32);
        index.upsert(fp(42), &probe).unwrap();
        let hits = index.search(&probe, 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].fingerprint, fp(42));
        for i in 1..hits.len() {
            assert!(hits[i - 1].score >= hits[i].score);
        }
    }

    #[test]
    fn test_grows_past_initial_capacity() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::new(8, temp.path()).with_capacity(2);
        let index = HnswIndex::open_or_create(config).unwrap();
        for i in 0..20 {
            index.upsert(fp(i), &random_vector(8)).unwrap();
        }
        assert_eq!(index.len(), 20);
    }

    #[test]
    fn test_save_and_load_keeps_fingerprints() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::new(16, temp.path()).with_capacity(16);
        {
            let index = HnswIndex::open_or_create(config.clone()).unwrap();
            for i in 0..5 {
                index.upsert(fp(i), &random_vector(16)).unwrap();
            }
            index.save().unwrap();
        }
        let index = HnswIndex::open_or_create(config).unwrap();
        assert_eq!(index.len(), 5);
        assert!(index.contains(&fp(3)));
        let hits = index.search(&random_vector(16), 5).unwrap();
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let index =
            HnswIndex::open_or_create(HnswConfig::new(8, temp.path()).with_capacity(8)).unwrap();
        index.upsert(fp(1), &random_vector(8)).unwrap();
        assert!(index.contains(&fp(1)));
        assert!(index.remove(&fp(1)).unwrap());
        assert!(!index.contains(&fp(1)));
        assert!(!index.remove(&fp(1)).unwrap());
    }

    #[test]
    fn test_dimension_mismatch() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(64, temp.path())).unwrap();
        let result = index.upsert(fp(0), &random_vector(32));
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));
    }
}
