//! Owner reference type.
//!
//! An `OwnerReference` links one chunk position of an owner (document or
//! knowledge item) to a storage entry. Many references may point at the same
//! entry; the entry's `reference_count` equals the number of live references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Link from `(owner_id, sequence)` to a storage entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub owner_id: String,

    /// Chunk position within the owner
    pub sequence: u32,

    pub fingerprint: Fingerprint,

    /// When the reference was (re)linked
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub linked_at: DateTime<Utc>,
}

impl OwnerReference {
    pub fn new(owner_id: impl Into<String>, sequence: u32, fingerprint: Fingerprint) -> Self {
        Self {
            owner_id: owner_id.into(),
            sequence,
            fingerprint,
            linked_at: Utc::now(),
        }
    }

    /// Override the link timestamp.
    pub fn with_linked_at(mut self, linked_at: DateTime<Utc>) -> Self {
        self.linked_at = linked_at;
        self
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
