//! Tier classification.
//!
//! Policy: an entry is HOT if it was read at least `hot_access_threshold`
//! times in the trailing window, or was created within the grace period, or
//! was promoted by a read within the grace period. Everything else is COLD.
//!
//! Promotion is immediate and read-triggered (`VectorStore::touch`);
//! demotion only happens in the periodic `TierManager::reclassify` pass.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use vault_storage::{EntryFilter, VectorStore};
use vault_types::{duration_from_secs, Fingerprint, StorageEntry, Tier, TieringConfig};

use crate::compress::Compressor;
use crate::error::EngineError;

/// Pure classifier over an entry and its access statistics.
#[derive(Debug, Clone)]
pub struct TierClassifier {
    hot_access_threshold: usize,
    window: Duration,
    grace_period: Duration,
}

impl TierClassifier {
    pub fn new(config: &TieringConfig) -> Self {
        Self {
            hot_access_threshold: config.hot_access_threshold as usize,
            window: duration_from_secs(config.window_secs),
            grace_period: duration_from_secs(config.grace_period_secs),
        }
    }

    /// Classify an entry at `now`. Always returns a tier.
    pub fn classify(&self, entry: &StorageEntry, now: DateTime<Utc>) -> Tier {
        if entry.access.count_in_window(now, self.window) >= self.hot_access_threshold {
            return Tier::Hot;
        }
        if now - entry.created_at < self.grace_period {
            return Tier::Hot;
        }
        if let Some(promoted_at) = entry.promoted_at {
            if now - promoted_at < self.grace_period {
                return Tier::Hot;
            }
        }
        Tier::Cold
    }
}

impl Default for TierClassifier {
    fn default() -> Self {
        Self::new(&TieringConfig::default())
    }
}

/// Hot/cold counts over the full entry set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierDistribution {
    pub hot_count: u64,
    pub cold_count: u64,
    pub total_entries: u64,
}

impl TierDistribution {
    pub fn add(&mut self, tier: Tier) {
        match tier {
            Tier::Hot => self.hot_count += 1,
            Tier::Cold => self.cold_count += 1,
        }
        self.total_entries += 1;
    }

    /// Every entry lands in exactly one tier.
    pub fn is_complete(&self) -> bool {
        self.hot_count + self.cold_count == self.total_entries
    }
}

/// Outcome of one reclassification pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclassifyStats {
    pub examined: u64,
    pub promoted: u64,
    pub demoted: u64,
    pub unchanged: u64,
    pub recompressed: u64,
    pub bytes_saved: u64,
    pub skipped_corrupt: u64,
    pub distribution: TierDistribution,
    pub duration_ms: u64,
}

/// Periodic batch reclassification with optional cold recompression.
pub struct TierManager {
    store: Arc<dyn VectorStore>,
    classifier: TierClassifier,
    compressor: Compressor,
    recompress_cold: bool,
    recompress_min_bytes: u64,
}

impl TierManager {
    pub fn new(
        store: Arc<dyn VectorStore>,
        config: &TieringConfig,
        compressor: Compressor,
    ) -> Self {
        Self {
            store,
            classifier: TierClassifier::new(config),
            compressor,
            recompress_cold: config.recompress_cold,
            recompress_min_bytes: config.recompress_min_bytes,
        }
    }

    pub fn classifier(&self) -> &TierClassifier {
        &self.classifier
    }

    /// Reclassify every entry. Blocking; run off the async runtime.
    pub fn reclassify(&self, now: DateTime<Utc>) -> Result<ReclassifyStats, EngineError> {
        let start = Instant::now();
        let mut stats = ReclassifyStats::default();

        let snapshot: Vec<(Fingerprint, Tier)> = self
            .store
            .list(EntryFilter::all())?
            .map(|item| item.map(|e| (e.fingerprint, e.tier)))
            .collect::<Result<_, _>>()?;

        for (fingerprint, stored_tier) in snapshot {
            stats.examined += 1;
            let classifier = &self.classifier;
            let mut new_tier = stored_tier;
            let updated = self.store.update_entry(&fingerprint, &mut |entry| {
                new_tier = classifier.classify(entry, now);
                entry.tier = new_tier;
            })?;
            let Some(entry) = updated else {
                continue;
            };
            stats.distribution.add(entry.tier);

            match (stored_tier, new_tier) {
                (Tier::Cold, Tier::Hot) => stats.promoted += 1,
                (Tier::Hot, Tier::Cold) => {
                    stats.demoted += 1;
                    debug!(fingerprint = %fingerprint.short(), "Demoted to COLD");
                    if self.recompress_cold && entry.original_size_bytes >= self.recompress_min_bytes {
                        match self.recompress(&entry) {
                            Ok(Some(saved)) => {
                                stats.recompressed += 1;
                                stats.bytes_saved += saved;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(fingerprint = %fingerprint.short(), error = %e, "Skipping recompression");
                                stats.skipped_corrupt += 1;
                            }
                        }
                    }
                }
                _ => stats.unchanged += 1,
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            examined = stats.examined,
            promoted = stats.promoted,
            demoted = stats.demoted,
            recompressed = stats.recompressed,
            hot = stats.distribution.hot_count,
            cold = stats.distribution.cold_count,
            duration_ms = stats.duration_ms,
            "Tier reclassification complete"
        );
        Ok(stats)
    }

    /// Re-encode a demoted entry with the cold zstd level when that is smaller.
    fn recompress(&self, entry: &StorageEntry) -> Result<Option<u64>, EngineError> {
        let payload = Compressor::decode_entry(entry)?;
        let raw = payload
            .to_bytes()
            .map_err(|e| EngineError::integrity(entry.fingerprint, e))?;
        let current = entry.compressed_payload.len();
        let Some(cold) = self.compressor.compress_cold(&raw, current) else {
            return Ok(None);
        };

        let mut saved = 0u64;
        self.store.update_entry(&entry.fingerprint, &mut |stored| {
            // A concurrent write may already have replaced the payload.
            if stored.tier == Tier::Cold && stored.compressed_payload.len() > cold.bytes.len() {
                saved = (stored.compressed_payload.len() - cold.bytes.len()) as u64;
                stored.compressed_payload = cold.bytes.clone();
                stored.algorithm = cold.algorithm;
                stored.compression_ratio = cold.ratio;
            }
        })?;
        Ok((saved > 0).then_some(saved))
    }
}
