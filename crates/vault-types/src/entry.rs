//! Storage entry types.
//!
//! A `StorageEntry` is the canonical persisted record for one distinct
//! fingerprint. Duplicate chunks never create a second entry; they only add
//! owner references and bump `reference_count`.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::fingerprint::Fingerprint;
use crate::time::cutoff_before;

/// Most recent read timestamps retained per entry.
pub const MAX_RECENT_ACCESSES: usize = 64;

/// Storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Frequently accessed, kept on the fast codec
    Hot,
    /// Infrequently accessed, candidate for heavier compression
    Cold,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Hot => write!(f, "HOT"),
            Tier::Cold => write!(f, "COLD"),
        }
    }
}

/// Compression codec tag stored alongside each payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    Lz4,
    Zstd,
}

impl CompressionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionAlgorithm::None),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            "zstd" => Ok(CompressionAlgorithm::Zstd),
            other => Err(VaultError::InvalidInput(format!(
                "unknown compression algorithm: {}",
                other
            ))),
        }
    }
}

/// Read statistics used by tier classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessStats {
    /// Millisecond timestamps of the most recent reads, oldest first
    #[serde(default)]
    pub recent_ms: VecDeque<i64>,

    /// Lifetime read count
    #[serde(default)]
    pub total_reads: u64,
}

impl AccessStats {
    /// Record a read at `now`.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.recent_ms.push_back(now.timestamp_millis());
        while self.recent_ms.len() > MAX_RECENT_ACCESSES {
            self.recent_ms.pop_front();
        }
        self.total_reads = self.total_reads.saturating_add(1);
    }

    /// Number of reads within the trailing `window` ending at `now`.
    pub fn count_in_window(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = cutoff_before(now, window).timestamp_millis();
        self.recent_ms.iter().filter(|&&ts| ts >= cutoff).count()
    }
}

/// Canonical record for one distinct fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub fingerprint: Fingerprint,

    /// Encoded payload bytes, hex in JSON
    #[serde(with = "hex_bytes")]
    pub compressed_payload: Vec<u8>,

    pub algorithm: CompressionAlgorithm,

    /// compressed size / original size, in (0, 1]
    pub compression_ratio: f64,

    pub original_size_bytes: u64,

    /// SHA-256 of the uncompressed payload, lowercase hex
    pub payload_digest: String,

    pub tier: Tier,

    /// Number of owner references pointing at this entry
    pub reference_count: u64,

    /// Set when the count reached zero; cleared if a reference is relinked
    #[serde(default)]
    pub pending_deletion_since: Option<DateTime<Utc>>,

    /// Last read-through promotion
    #[serde(default)]
    pub promoted_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub access: AccessStats,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_accessed_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl StorageEntry {
    /// Create a fresh, unreferenced entry.
    ///
    /// New entries start HOT; the reference count is raised by linking.
    pub fn new(
        fingerprint: Fingerprint,
        compressed_payload: Vec<u8>,
        algorithm: CompressionAlgorithm,
        compression_ratio: f64,
        original_size_bytes: u64,
        payload_digest: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            compressed_payload,
            algorithm,
            compression_ratio,
            original_size_bytes,
            payload_digest,
            tier: Tier::Hot,
            reference_count: 0,
            pending_deletion_since: None,
            promoted_at: None,
            access: AccessStats::default(),
            last_accessed_at: now,
            created_at: now,
        }
    }

    /// Builder-style tier override.
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// True when the stored payload is encoded with a real codec.
    pub fn is_compressed(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }

    pub fn is_pending_deletion(&self) -> bool {
        self.pending_deletion_since.is_some()
    }

    /// Bytes actually held for the payload.
    pub fn stored_size_bytes(&self) -> u64 {
        self.compressed_payload.len() as u64
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

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> StorageEntry {
        StorageEntry::new(
            Fingerprint::from_bytes([7u8; 32]),
            vec![1, 2, 3, 255],
            CompressionAlgorithm::Lz4,
            0.5,
            8,
            "ab".repeat(32),
            Utc::now(),
        )
    }

    #[test]
    fn test_entry_serialization_roundtrip() {
        let e = entry();
        let bytes = e.to_bytes().unwrap();
        let decoded = StorageEntry::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.fingerprint, e.fingerprint);
        assert_eq!(decoded.compressed_payload, vec![1, 2, 3, 255]);
        assert_eq!(decoded.algorithm, CompressionAlgorithm::Lz4);
        assert_eq!(decoded.tier, Tier::Hot);
        assert_eq!(decoded.reference_count, 0);
    }

    #[test]
    fn test_payload_is_hex_in_json() {
        let json = String::from_utf8(entry().to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"compressed_payload\":\"010203ff\""));
        assert!(json.contains("\"tier\":\"HOT\""));
        assert!(json.contains("\"algorithm\":\"lz4\""));
    }

    #[test]
    fn test_access_window() {
        let now = Utc::now();
        let mut stats = AccessStats::default();
        stats.record(now - Duration::days(10));
        stats.record(now - Duration::hours(2));
        stats.record(now);
        assert_eq!(stats.total_reads, 3);
        assert_eq!(stats.count_in_window(now, Duration::days(7)), 2);
        assert_eq!(stats.count_in_window(now, Duration::days(30)), 3);
    }

    #[test]
    fn test_access_window_wider_than_calendar() {
        let now = Utc::now();
        let mut stats = AccessStats::default();
        stats.record(now - Duration::days(400));
        stats.record(now);
        assert_eq!(stats.count_in_window(now, Duration::MAX), 2);
    }

    #[test]
    fn test_access_history_is_capped() {
        let now = Utc::now();
        let mut stats = AccessStats::default();
        for _ in 0..(MAX_RECENT_ACCESSES + 10) {
            stats.record(now);
        }
        assert_eq!(stats.recent_ms.len(), MAX_RECENT_ACCESSES);
        assert_eq!(stats.total_reads, (MAX_RECENT_ACCESSES + 10) as u64);
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("LZ4".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Lz4);
        assert_eq!("none".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::None);
        assert!("brotli".parse::<CompressionAlgorithm>().is_err());
    }
}
