//! Chunk types for ingestion.
//!
//! A chunk is a unit of text plus its embedding vector. Chunks arrive in
//! batches grouped by owner (a document or knowledge item) and are never
//! mutated after storage; a later ingestion of the same owner supersedes them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Maximum number of metadata entries on a single chunk.
pub const MAX_METADATA_ENTRIES: usize = 32;

/// Maximum length of a metadata key in bytes.
pub const MAX_METADATA_KEY_LEN: usize = 64;

/// Maximum length of an owner id in bytes.
pub const MAX_OWNER_ID_LEN: usize = 128;

/// A typed metadata value.
///
/// Metadata is restricted to scalar values so that payload encoding stays
/// deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Schema-validated key-value metadata attached to a chunk.
///
/// Keys are kept sorted so serialization is byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkMetadata(BTreeMap<String, MetadataValue>);

impl ChunkMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    /// Check entry count, key shape, and that floats are finite.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.0.len() > MAX_METADATA_ENTRIES {
            return Err(VaultError::InvalidInput(format!(
                "metadata has {} entries, max is {}",
                self.0.len(),
                MAX_METADATA_ENTRIES
            )));
        }
        for (key, value) in &self.0 {
            if key.is_empty() {
                return Err(VaultError::InvalidInput("metadata key is empty".into()));
            }
            if key.len() > MAX_METADATA_KEY_LEN {
                return Err(VaultError::InvalidInput(format!(
                    "metadata key '{}' exceeds {} bytes",
                    key, MAX_METADATA_KEY_LEN
                )));
            }
            if let MetadataValue::Float(f) = value {
                if !f.is_finite() {
                    return Err(VaultError::InvalidInput(format!(
                        "metadata value for '{}' is not finite",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One chunk as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,

    #[serde(default)]
    pub vector: Vec<f32>,

    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            vector,
            metadata: ChunkMetadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate the chunk shape.
    ///
    /// Text must be non-blank and at most `max_text_bytes`; the vector must
    /// match `dimension` (when one is given) and contain only finite values.
    pub fn validate(&self, max_text_bytes: usize, dimension: Option<usize>) -> Result<(), VaultError> {
        if self.text.trim().is_empty() {
            return Err(VaultError::InvalidInput("chunk text is empty".into()));
        }
        if self.text.len() > max_text_bytes {
            return Err(VaultError::InvalidInput(format!(
                "chunk text is {} bytes, max is {}",
                self.text.len(),
                max_text_bytes
            )));
        }
        if let Some(dim) = dimension {
            if self.vector.len() != dim {
                return Err(VaultError::InvalidInput(format!(
                    "vector dimension mismatch: expected {}, got {}",
                    dim,
                    self.vector.len()
                )));
            }
        }
        if self.vector.iter().any(|v| !v.is_finite()) {
            return Err(VaultError::InvalidInput("vector contains non-finite values".into()));
        }
        self.metadata.validate()
    }

    /// Convert into the payload that gets compressed and persisted.
    pub fn into_payload(self) -> ChunkPayload {
        ChunkPayload {
            text: self.text,
            vector: self.vector,
            metadata: self.metadata,
        }
    }
}

/// The uncompressed content stored for an entry.
///
/// This is the first writer's chunk content; later duplicates only add
/// references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub text: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl ChunkPayload {
    /// Serialize to JSON bytes for compression
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from decompressed JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Validate an owner id for use inside storage keys.
pub fn validate_owner_id(owner_id: &str) -> Result<(), VaultError> {
    if owner_id.is_empty() {
        return Err(VaultError::InvalidInput("owner id is empty".into()));
    }
    if owner_id.len() > MAX_OWNER_ID_LEN {
        return Err(VaultError::InvalidInput(format!(
            "owner id exceeds {} bytes",
            MAX_OWNER_ID_LEN
        )));
    }
    if owner_id
        .chars()
        .any(|c| c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(VaultError::InvalidInput(format!(
            "owner id '{}' contains ':' or whitespace",
            owner_id.escape_debug()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_validation() {
        let chunk = Chunk::new("hello world", vec![0.1, 0.2, 0.3]);
        assert!(chunk.validate(1024, Some(3)).is_ok());
        assert!(chunk.validate(1024, None).is_ok());
        assert!(chunk.validate(1024, Some(4)).is_err());
        assert!(chunk.validate(5, Some(3)).is_err());

        let blank = Chunk::new("   \n\t", vec![]);
        assert!(blank.validate(1024, None).is_err());

        let nan = Chunk::new("text", vec![f32::NAN]);
        assert!(nan.validate(1024, None).is_err());
    }

    #[test]
    fn test_metadata_validation() {
        let ok = ChunkMetadata::new().with("source", "wiki").with("page", 3i64);
        assert!(ok.validate().is_ok());

        let empty_key = ChunkMetadata::new().with("", "x");
        assert!(empty_key.validate().is_err());

        let long_key = ChunkMetadata::new().with("k".repeat(65), "x");
        assert!(long_key.validate().is_err());

        let mut too_many = ChunkMetadata::new();
        for i in 0..=MAX_METADATA_ENTRIES {
            too_many.insert(format!("k{}", i), i as i64);
        }
        assert!(too_many.validate().is_err());

        let inf = ChunkMetadata::new().with("score", MetadataValue::Float(f64::INFINITY));
        assert!(inf.validate().is_err());
    }

    #[test]
    fn test_metadata_serialization_is_sorted() {
        let a = ChunkMetadata::new().with("b", 1i64).with("a", true);
        let b = ChunkMetadata::new().with("a", true).with("b", 1i64);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert_eq!(serde_json::to_string(&a).unwrap(), r#"{"a":true,"b":1}"#);
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = Chunk::new("some text", vec![1.0, -2.5])
            .with_metadata(ChunkMetadata::new().with("lang", "en"))
            .into_payload();
        let bytes = payload.to_bytes().unwrap();
        let decoded = ChunkPayload::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_owner_id_validation() {
        assert!(validate_owner_id("doc-42").is_ok());
        assert!(validate_owner_id("").is_err());
        assert!(validate_owner_id("a:b").is_err());
        assert!(validate_owner_id("a b").is_err());
        assert!(validate_owner_id(&"x".repeat(129)).is_err());
    }
}
