//! Content fingerprint type.
//!
//! A fingerprint is the 32-byte SHA-256 digest of a chunk's normalized text.
//! It is the primary key of the entries column family and is rendered as
//! lowercase hex everywhere else (logs, reverse-index keys, JSON).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::VaultError;

/// Fixed-size content digest used for exact-duplicate detection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; Fingerprint::LEN]);

impl Fingerprint {
    /// Digest length in bytes (256 bits).
    pub const LEN: usize = 32;

    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, failing if the length is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, VaultError> {
        let array: [u8; Self::LEN] = bytes.try_into().map_err(|_| {
            VaultError::InvalidFingerprint(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, VaultError> {
        let bytes = hex::decode(s).map_err(|e| VaultError::InvalidFingerprint(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Full lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Stable 64-bit key derived from the leading digest bytes.
    ///
    /// Used as the key in similarity indexes that only accept integer ids.
    pub fn index_key(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Fingerprint {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        Fingerprint::from_bytes(bytes)
    }

    #[test]
    fn test_hex_roundtrip() {
        let fp = sample();
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), fp);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(Fingerprint::from_slice(&[1, 2, 3]).is_err());
        assert!(Fingerprint::from_hex("abcd").is_err());
        assert!(Fingerprint::from_hex("zz").is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let fp = sample();
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let decoded: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, fp);
    }

    #[test]
    fn test_short_and_index_key() {
        let fp = sample();
        assert_eq!(fp.short(), "000102030405");
        assert_eq!(fp.index_key(), 0x0001020304050607);
    }
}
