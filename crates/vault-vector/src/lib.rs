//! # vault-vector
//!
//! Similarity search over entry vectors.
//!
//! The vault treats vector similarity as an external capability behind the
//! `SimilarityIndex` trait. Two backends are provided:
//! - `FlatIndex`: exact brute-force cosine similarity held in memory
//! - `HnswIndex`: usearch-powered HNSW graph with on-disk persistence
//!
//! Both are keyed by content fingerprint; the vault resolves every hit back
//! through the vector store before returning it.

pub mod error;
pub mod flat;
pub mod hnsw;
pub mod index;

pub use error::VectorError;
pub use flat::FlatIndex;
pub use hnsw::{HnswConfig, HnswIndex};
pub use index::{IndexStats, SearchHit, SimilarityIndex};
