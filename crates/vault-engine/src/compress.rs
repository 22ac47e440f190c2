//! Payload compression.
//!
//! Every payload is tried against a small fixed candidate set and the
//! smallest encoding wins. `none` is always a candidate, so a payload that
//! does not shrink is stored raw. Decoding never returns partial output: any
//! codec failure or digest mismatch is a `CompressionIntegrity` error.
//!
//! Wire formats:
//! - lz4: lz4_flex block with the original length prepended (u32 LE)
//! - zstd: a single zstd frame

use std::io::{Cursor, Read};

use sha2::{Digest, Sha256};
use tracing::{error, warn};
use vault_types::{ChunkPayload, CompressionAlgorithm, CompressionConfig, StorageEntry};

use crate::error::EngineError;

/// Upper bound on a decoded payload; larger size headers are treated as corrupt.
pub const MAX_DECODED_BYTES: usize = 256 * 1024 * 1024;

/// Result of compressing one payload.
#[derive(Debug, Clone)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub algorithm: CompressionAlgorithm,
    /// compressed size / original size; 1.0 for empty or raw payloads
    pub ratio: f64,
    pub original_size: usize,
}

impl Compressed {
    /// Ratio close to 1.0 means the codec bought almost nothing.
    pub fn is_poor(&self) -> bool {
        self.ratio >= 0.95
    }
}

/// Codec selector with round-trip verification.
#[derive(Debug, Clone)]
pub struct Compressor {
    candidates: Vec<CompressionAlgorithm>,
    zstd_level: i32,
    cold_zstd_level: i32,
    verify_round_trip: bool,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(&CompressionConfig::default())
    }
}

/// SHA-256 of an uncompressed payload, lowercase hex.
pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn ratio(compressed: usize, original: usize) -> f64 {
    if original == 0 {
        1.0
    } else {
        compressed as f64 / original as f64
    }
}

impl Compressor {
    pub fn new(config: &CompressionConfig) -> Self {
        let mut candidates: Vec<CompressionAlgorithm> = config
            .algorithms
            .iter()
            .copied()
            .filter(|a| *a != CompressionAlgorithm::None)
            .collect();
        candidates.dedup();
        Self {
            candidates,
            zstd_level: config.zstd_level,
            cold_zstd_level: config.cold_zstd_level,
            verify_round_trip: config.verify_round_trip,
        }
    }

    /// Compress with the smallest candidate, falling back to `none`.
    pub fn compress(&self, payload: &[u8]) -> Compressed {
        let mut best = Compressed {
            bytes: payload.to_vec(),
            algorithm: CompressionAlgorithm::None,
            ratio: 1.0,
            original_size: payload.len(),
        };
        if payload.is_empty() {
            return best;
        }

        for &algorithm in &self.candidates {
            let Some(bytes) = self.try_encode(payload, algorithm, self.zstd_level) else {
                continue;
            };
            if bytes.len() < best.bytes.len() {
                best = Compressed {
                    ratio: ratio(bytes.len(), payload.len()),
                    bytes,
                    algorithm,
                    original_size: payload.len(),
                };
            }
        }
        best
    }

    /// Heavier zstd encoding for demoted entries. Returns `None` unless it
    /// beats `current_size`.
    pub fn compress_cold(&self, payload: &[u8], current_size: usize) -> Option<Compressed> {
        if payload.is_empty() {
            return None;
        }
        let bytes = self.try_encode(payload, CompressionAlgorithm::Zstd, self.cold_zstd_level)?;
        if bytes.len() >= current_size {
            return None;
        }
        Some(Compressed {
            ratio: ratio(bytes.len(), payload.len()),
            bytes,
            algorithm: CompressionAlgorithm::Zstd,
            original_size: payload.len(),
        })
    }

    /// Encode and, when enabled, verify the round trip. Codec failures drop
    /// the candidate instead of failing the payload.
    fn try_encode(
        &self,
        payload: &[u8],
        algorithm: CompressionAlgorithm,
        level: i32,
    ) -> Option<Vec<u8>> {
        let encoded = match encode(payload, algorithm, level) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(algorithm = %algorithm, error = %e, "Codec failed, skipping candidate");
                return None;
            }
        };
        if self.verify_round_trip {
            match decompress(&encoded, algorithm) {
                Ok(decoded) if decoded == payload => {}
                _ => {
                    error!(algorithm = %algorithm, "Round-trip verification failed, skipping candidate");
                    return None;
                }
            }
        }
        Some(encoded)
    }

    /// Decode an entry's payload and check it against the stored digest.
    pub fn decode_entry(entry: &StorageEntry) -> Result<ChunkPayload, EngineError> {
        let raw = decompress(&entry.compressed_payload, entry.algorithm)
            .map_err(|reason| EngineError::integrity(entry.fingerprint, reason))?;
        if raw.len() as u64 != entry.original_size_bytes {
            return Err(EngineError::integrity(
                entry.fingerprint,
                format!(
                    "decoded {} bytes, expected {}",
                    raw.len(),
                    entry.original_size_bytes
                ),
            ));
        }
        if payload_digest(&raw) != entry.payload_digest {
            return Err(EngineError::integrity(entry.fingerprint, "payload digest mismatch"));
        }
        ChunkPayload::from_bytes(&raw)
            .map_err(|e| EngineError::integrity(entry.fingerprint, format!("payload decode: {}", e)))
    }
}

fn encode(payload: &[u8], algorithm: CompressionAlgorithm, level: i32) -> std::io::Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(payload.to_vec()),
        CompressionAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(payload)),
        CompressionAlgorithm::Zstd => zstd::encode_all(Cursor::new(payload), level),
    }
}

/// Decode bytes produced by `algorithm`. Errors carry a human-readable reason.
pub fn decompress(bytes: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>, String> {
    match algorithm {
        CompressionAlgorithm::None => Ok(bytes.to_vec()),
        CompressionAlgorithm::Lz4 => {
            if bytes.len() < 4 {
                return Err("lz4 payload shorter than its size header".to_string());
            }
            let claimed = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            if claimed > MAX_DECODED_BYTES {
                return Err(format!("lz4 size header {} exceeds limit", claimed));
            }
            lz4_flex::decompress_size_prepended(bytes)
                .map_err(|e| format!("lz4 decompression failed: {}", e))
        }
        CompressionAlgorithm::Zstd => decode_zstd(bytes, MAX_DECODED_BYTES),
    }
}

/// Stream-decode a zstd frame, failing once output passes `limit` bytes.
fn decode_zstd(bytes: &[u8], limit: usize) -> Result<Vec<u8>, String> {
    let decoder = zstd::stream::read::Decoder::new(bytes)
        .map_err(|e| format!("zstd decompression failed: {}", e))?;
    let mut out = Vec::new();
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| format!("zstd decompression failed: {}", e))?;
    if out.len() > limit {
        return Err(format!("zstd output exceeds limit of {} bytes", limit));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::Rng;
    use vault_types::{Chunk, Fingerprint};

    fn all_algorithms() -> [CompressionAlgorithm; 3] {
        [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Lz4,
            CompressionAlgorithm::Zstd,
        ]
    }

    #[test]
    fn test_round_trip_every_algorithm() {
        let mut rng = rand::rng();
        let random: Vec<u8> = (0..2048).map(|_| rng.random()).collect();
        let repetitive = b"abcabcabc".repeat(500);
        for payload in [Vec::new(), vec![0u8], random, repetitive] {
            for algorithm in all_algorithms() {
                let encoded = encode(&payload, algorithm, 3).unwrap();
                assert_eq!(decompress(&encoded, algorithm).unwrap(), payload);
            }
        }
    }

    #[test]
    fn test_selects_smallest_candidate() {
        let compressor = Compressor::default();
        let payload = b"the same sentence again and again. ".repeat(200);
        let result = compressor.compress(&payload);
        assert_ne!(result.algorithm, CompressionAlgorithm::None);
        assert!(result.ratio < 0.2);
        assert_eq!(decompress(&result.bytes, result.algorithm).unwrap(), payload);
    }

    #[test]
    fn test_incompressible_falls_back_to_none() {
        let compressor = Compressor::default();
        let mut rng = rand::rng();
        let payload: Vec<u8> = (0..64).map(|_| rng.random()).collect();
        let result = compressor.compress(&payload);
        assert_eq!(result.algorithm, CompressionAlgorithm::None);
        assert_eq!(result.ratio, 1.0);
        assert!(result.is_poor());
        assert_eq!(result.bytes, payload);
    }

    #[test]
    fn test_empty_payload() {
        let result = Compressor::default().compress(&[]);
        assert_eq!(result.algorithm, CompressionAlgorithm::None);
        assert_eq!(result.ratio, 1.0);
        assert!(result.bytes.is_empty());
    }

    #[test]
    fn test_ratio_in_unit_interval() {
        let compressor = Compressor::default();
        for size in [1usize, 10, 100, 10_000] {
            let payload = vec![b'x'; size];
            let result = compressor.compress(&payload);
            assert!(result.ratio > 0.0 && result.ratio <= 1.0, "ratio {}", result.ratio);
        }
    }

    #[test]
    fn test_corrupt_input_is_an_error() {
        assert!(decompress(&[1, 2], CompressionAlgorithm::Lz4).is_err());
        assert!(decompress(&[0xff; 16], CompressionAlgorithm::Lz4).is_err());
        assert!(decompress(b"not a zstd frame", CompressionAlgorithm::Zstd).is_err());
    }

    #[test]
    fn test_zstd_output_is_bounded() {
        let payload = vec![0u8; 64 * 1024];
        let frame = zstd::encode_all(Cursor::new(&payload[..]), 3).unwrap();
        assert!(frame.len() < 1024);

        assert_eq!(decode_zstd(&frame, payload.len()).unwrap(), payload);
        let err = decode_zstd(&frame, payload.len() - 1).unwrap_err();
        assert!(err.contains("exceeds limit"));
    }

    #[test]
    fn test_cold_recompression_only_when_smaller() {
        let compressor = Compressor::default();
        let payload = b"cold data cold data cold data ".repeat(300);
        let hot = compressor.compress(&payload);
        let cold = compressor.compress_cold(&payload, hot.bytes.len());
        if let Some(cold) = cold {
            assert!(cold.bytes.len() < hot.bytes.len());
            assert_eq!(cold.algorithm, CompressionAlgorithm::Zstd);
        }
        assert!(compressor.compress_cold(&payload, 1).is_none());
    }

    fn stored_entry(payload: &ChunkPayload) -> StorageEntry {
        let raw = payload.to_bytes().unwrap();
        let compressed = Compressor::default().compress(&raw);
        StorageEntry::new(
            Fingerprint::from_bytes([1; 32]),
            compressed.bytes,
            compressed.algorithm,
            compressed.ratio,
            raw.len() as u64,
            payload_digest(&raw),
            Utc::now(),
        )
    }

    #[test]
    fn test_decode_entry_verifies_digest() {
        let payload = Chunk::new("some text ".repeat(50), vec![0.5; 8]).into_payload();
        let entry = stored_entry(&payload);
        assert_eq!(Compressor::decode_entry(&entry).unwrap(), payload);

        let mut tampered = entry.clone();
        tampered.payload_digest = "00".repeat(32);
        assert!(matches!(
            Compressor::decode_entry(&tampered),
            Err(EngineError::CompressionIntegrity { .. })
        ));

        let mut truncated = entry;
        truncated.compressed_payload.truncate(3);
        assert!(matches!(
            Compressor::decode_entry(&truncated),
            Err(EngineError::CompressionIntegrity { .. })
        ));
    }
}
