//! Key encoding and decoding for the storage layer.
//!
//! - entries: raw 32-byte fingerprint
//! - owner_refs: `ref:{owner_id}:{sequence:010}`
//! - fingerprint_refs: `{fingerprint_hex}:{owner_id}:{sequence:010}`
//! - processing_history: `hist:{timestamp_ms:013}:{ulid}`
//! - analytics_events: `evt:{timestamp_ms:013}:{ulid}`
//!
//! Owner ids never contain ':' so every key splits unambiguously, and
//! zero-padded numbers keep lexicographic order equal to numeric order.

use ulid::Ulid;
use vault_types::Fingerprint;

use crate::error::StorageError;

fn utf8(bytes: &[u8]) -> Result<&str, StorageError> {
    std::str::from_utf8(bytes).map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))
}

fn parse_sequence(s: &str) -> Result<u32, StorageError> {
    s.parse()
        .map_err(|e| StorageError::Key(format!("Invalid sequence: {}", e)))
}

/// Key for owner references
/// Format: ref:{owner_id}:{sequence:010}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRefKey {
    pub owner_id: String,
    pub sequence: u32,
}

impl OwnerRefKey {
    pub fn new(owner_id: impl Into<String>, sequence: u32) -> Self {
        Self {
            owner_id: owner_id.into(),
            sequence,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("ref:{}:{:010}", self.owner_id, self.sequence).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "ref" {
            return Err(StorageError::Key(format!("Invalid owner ref key format: {}", s)));
        }
        Ok(Self {
            owner_id: parts[1].to_string(),
            sequence: parse_sequence(parts[2])?,
        })
    }

    /// Prefix covering every reference of one owner
    pub fn owner_prefix(owner_id: &str) -> Vec<u8> {
        format!("ref:{}:", owner_id).into_bytes()
    }
}

/// Reverse-index key from a fingerprint to one owner position
/// Format: {fingerprint_hex}:{owner_id}:{sequence:010}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRefKey {
    pub fingerprint: Fingerprint,
    pub owner_id: String,
    pub sequence: u32,
}

impl FingerprintRefKey {
    pub fn new(fingerprint: Fingerprint, owner_id: impl Into<String>, sequence: u32) -> Self {
        Self {
            fingerprint,
            owner_id: owner_id.into(),
            sequence,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{}:{}:{:010}",
            self.fingerprint.to_hex(),
            self.owner_id,
            self.sequence
        )
        .into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(StorageError::Key(format!(
                "Invalid fingerprint ref key format: {}",
                s
            )));
        }
        let fingerprint = Fingerprint::from_hex(parts[0])
            .map_err(|e| StorageError::Key(format!("Invalid fingerprint: {}", e)))?;
        Ok(Self {
            fingerprint,
            owner_id: parts[1].to_string(),
            sequence: parse_sequence(parts[2])?,
        })
    }

    /// Prefix covering every owner position of one fingerprint
    pub fn fingerprint_prefix(fingerprint: &Fingerprint) -> Vec<u8> {
        format!("{}:", fingerprint.to_hex()).into_bytes()
    }
}

/// Key for time-ordered, append-only rows
/// Format: {prefix}:{timestamp_ms:013}:{ulid}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeKey {
    pub prefix: &'static str,
    pub timestamp_ms: i64,
    pub ulid: Ulid,
}

impl TimeKey {
    pub const HISTORY: &'static str = "hist";
    pub const ANALYTICS: &'static str = "evt";

    /// Key for a processing history row
    pub fn history(timestamp_ms: i64, record_id: &str) -> Result<Self, StorageError> {
        Self::from_id(Self::HISTORY, timestamp_ms, record_id)
    }

    /// Key for an analytics event row
    pub fn analytics(timestamp_ms: i64, event_id: &str) -> Result<Self, StorageError> {
        Self::from_id(Self::ANALYTICS, timestamp_ms, event_id)
    }

    fn from_id(prefix: &'static str, timestamp_ms: i64, id: &str) -> Result<Self, StorageError> {
        let ulid: Ulid = id
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid ULID: {}", e)))?;
        Ok(Self {
            prefix,
            timestamp_ms,
            ulid,
        })
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        // Zero-pad timestamp to 13 digits for lexicographic sorting
        format!("{}:{:013}:{}", self.prefix, self.timestamp_ms, self.ulid).into_bytes()
    }

    /// Decode a key written under `prefix`
    pub fn from_bytes(prefix: &'static str, bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != prefix {
            return Err(StorageError::Key(format!("Invalid {} key format: {}", prefix, s)));
        }
        let timestamp_ms: i64 = parts[1]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid timestamp: {}", e)))?;
        let ulid: Ulid = parts[2]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid ULID: {}", e)))?;
        Ok(Self {
            prefix,
            timestamp_ms,
            ulid,
        })
    }

    /// Upper bound (exclusive) for a scan of rows older than `end_ms`
    pub fn prefix_end(prefix: &str, end_ms: i64) -> Vec<u8> {
        format!("{}:{:013}:", prefix, end_ms.max(0)).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_ref_key_roundtrip() {
        let key = OwnerRefKey::new("doc-7", 42);
        assert_eq!(key.to_bytes(), b"ref:doc-7:0000000042".to_vec());
        let decoded = OwnerRefKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
        assert!(key.to_bytes().starts_with(&OwnerRefKey::owner_prefix("doc-7")));
    }

    #[test]
    fn test_owner_prefix_does_not_match_longer_owner() {
        let key = OwnerRefKey::new("doc-10", 0);
        assert!(!key.to_bytes().starts_with(&OwnerRefKey::owner_prefix("doc-1")));
    }

    #[test]
    fn test_owner_ref_sequence_order() {
        let a = OwnerRefKey::new("d", 9).to_bytes();
        let b = OwnerRefKey::new("d", 10).to_bytes();
        assert!(a < b);
    }

    #[test]
    fn test_fingerprint_ref_key_roundtrip() {
        let fp = Fingerprint::from_bytes([0xab; 32]);
        let key = FingerprintRefKey::new(fp, "kb-1", 3);
        let decoded = FingerprintRefKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
        assert!(key
            .to_bytes()
            .starts_with(&FingerprintRefKey::fingerprint_prefix(&fp)));
    }

    #[test]
    fn test_time_key_roundtrip_and_order() {
        let id = Ulid::new().to_string();
        let key = TimeKey::history(1706540400000, &id).unwrap();
        let decoded = TimeKey::from_bytes(TimeKey::HISTORY, &key.to_bytes()).unwrap();
        assert_eq!(decoded, key);

        let earlier = TimeKey::analytics(1000, &Ulid::new().to_string()).unwrap();
        let later = TimeKey::analytics(2000, &Ulid::new().to_string()).unwrap();
        assert!(earlier.to_bytes() < later.to_bytes());
        assert!(earlier.to_bytes() < TimeKey::prefix_end(TimeKey::ANALYTICS, 2000));
        assert!(later.to_bytes() >= TimeKey::prefix_end(TimeKey::ANALYTICS, 2000));
    }

    #[test]
    fn test_time_key_rejects_wrong_prefix() {
        let key = TimeKey::history(1, &Ulid::new().to_string()).unwrap();
        assert!(TimeKey::from_bytes(TimeKey::ANALYTICS, &key.to_bytes()).is_err());
    }
}
