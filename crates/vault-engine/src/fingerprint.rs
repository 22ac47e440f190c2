//! Content fingerprinting.
//!
//! Normalization policy (changing it changes which chunks deduplicate):
//! 1. trim leading and trailing whitespace
//! 2. collapse every run of Unicode whitespace into one ASCII space
//! 3. lowercase (Unicode)
//!
//! The digest is SHA-256 over the normalized UTF-8 bytes. When vectors are
//! included, a 0x00 separator and the little-endian f32 bytes follow.

use sha2::{Digest, Sha256};
use vault_types::{Chunk, Fingerprint, FingerprintConfig};

/// Deterministic content hasher. Holds no state beyond its policy.
#[derive(Debug, Clone, Default)]
pub struct ContentFingerprinter {
    include_vector: bool,
}

impl ContentFingerprinter {
    pub fn new(config: &FingerprintConfig) -> Self {
        Self {
            include_vector: config.include_vector,
        }
    }

    /// Apply the normalization policy.
    pub fn normalize(text: &str) -> String {
        text.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Fingerprint text only. Any string, including empty, yields a digest.
    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(Self::normalize(text).as_bytes());
        Fingerprint::from_bytes(hasher.finalize().into())
    }

    /// Fingerprint a chunk under the configured policy.
    pub fn fingerprint_chunk(&self, chunk: &Chunk) -> Fingerprint {
        if !self.include_vector {
            return self.fingerprint(&chunk.text);
        }
        let mut hasher = Sha256::new();
        hasher.update(Self::normalize(&chunk.text).as_bytes());
        hasher.update([0u8]);
        for value in &chunk.vector {
            hasher.update(value.to_le_bytes());
        }
        Fingerprint::from_bytes(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_policy() {
        assert_eq!(
            ContentFingerprinter::normalize("  Hello \t\n  WORLD  "),
            "hello world"
        );
        assert_eq!(ContentFingerprinter::normalize(""), "");
        assert_eq!(ContentFingerprinter::normalize("Ünïcode\u{2003}Text"), "ünïcode text");
    }

    #[test]
    fn test_equivalent_text_same_fingerprint() {
        let fp = ContentFingerprinter::default();
        assert_eq!(
            fp.fingerprint("The quick  brown fox"),
            fp.fingerprint("the quick brown FOX\n")
        );
        assert_ne!(fp.fingerprint("quick brown fox"), fp.fingerprint("quick brown dog"));
    }

    #[test]
    fn test_empty_text_has_digest() {
        let fp = ContentFingerprinter::default();
        // SHA-256 of the empty string
        assert_eq!(
            fp.fingerprint("").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(fp.fingerprint("   "), fp.fingerprint(""));
    }

    #[test]
    fn test_vector_inclusion() {
        let text_only = ContentFingerprinter::default();
        let with_vector = ContentFingerprinter::new(&FingerprintConfig {
            include_vector: true,
        });
        let a = Chunk::new("same text", vec![1.0, 2.0]);
        let b = Chunk::new("same text", vec![1.0, 3.0]);

        assert_eq!(text_only.fingerprint_chunk(&a), text_only.fingerprint_chunk(&b));
        assert_ne!(with_vector.fingerprint_chunk(&a), with_vector.fingerprint_chunk(&b));
        assert_ne!(with_vector.fingerprint_chunk(&a), text_only.fingerprint_chunk(&a));
    }
}
