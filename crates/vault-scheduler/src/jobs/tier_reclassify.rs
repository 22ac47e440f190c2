//! Scheduled tier reclassification.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use vault_engine::VectorVault;
use vault_types::TieringConfig;

use crate::{JitterConfig, JobOutput, OverlapPolicy, SchedulerError, SchedulerService, TimeoutConfig};

pub const TIER_RECLASSIFY_JOB: &str = "tier_reclassify";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierReclassifyJobConfig {
    /// Default "0 0 * * * *", hourly
    pub cron: String,
    pub timezone: Option<String>,
    pub jitter_secs: u64,
    pub timeout_secs: u64,
}

impl Default for TierReclassifyJobConfig {
    fn default() -> Self {
        Self::from(&TieringConfig::default())
    }
}

impl From<&TieringConfig> for TierReclassifyJobConfig {
    fn from(config: &TieringConfig) -> Self {
        Self {
            cron: config.cron.clone(),
            timezone: None,
            jitter_secs: 60,
            timeout_secs: 1800,
        }
    }
}

pub async fn register_tier_reclassify_job(
    scheduler: &SchedulerService,
    vault: Arc<VectorVault>,
    config: TierReclassifyJobConfig,
) -> Result<(), SchedulerError> {
    scheduler
        .register_job_with_metadata(
            TIER_RECLASSIFY_JOB,
            &config.cron,
            config.timezone.as_deref(),
            OverlapPolicy::Skip,
            JitterConfig::new(config.jitter_secs),
            TimeoutConfig::new(config.timeout_secs),
            move || {
                let vault = Arc::clone(&vault);
                async move {
                    let stats = vault
                        .reclassify()
                        .await
                        .map_err(|e| format!("Tier reclassification failed: {}", e))?;
                    info!(
                        examined = stats.examined,
                        promoted = stats.promoted,
                        demoted = stats.demoted,
                        recompressed = stats.recompressed,
                        "Tier reclassification completed"
                    );
                    Ok::<_, String>(JobOutput::new()
                        .with_metadata("examined", stats.examined)
                        .with_metadata("promoted", stats.promoted)
                        .with_metadata("demoted", stats.demoted)
                        .with_metadata("recompressed", stats.recompressed)
                        .with_metadata("bytes_saved", stats.bytes_saved)
                        .with_metadata("skipped_corrupt", stats.skipped_corrupt)
                        .with_metadata("hot", stats.distribution.hot_count)
                        .with_metadata("cold", stats.distribution.cold_count))
                }
            },
        )
        .await?;

    info!(cron = %config.cron, "Registered tier reclassification job");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::test_vault;
    use crate::{JobResult, SchedulerConfig};
    use chrono::{Duration, Utc};
    use vault_types::{Chunk, Tier};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reclassify_demotes_idle_entries() {
        let fixture = test_vault();
        fixture
            .vault
            .ingest("doc-a", vec![Chunk::new("idle", vec![1.0, 0.0]), Chunk::new("also idle", vec![0.0, 1.0])])
            .await
            .unwrap();

        let store = fixture.vault.store();
        for reference in store.references_for_owner("doc-a").unwrap() {
            store
                .update_entry(&reference.fingerprint, &mut |e| {
                    e.created_at = Utc::now() - Duration::days(30);
                    e.promoted_at = None;
                })
                .unwrap();
        }

        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        let config = TierReclassifyJobConfig {
            jitter_secs: 0,
            ..Default::default()
        };
        register_tier_reclassify_job(&scheduler, Arc::clone(&fixture.vault), config)
            .await
            .unwrap();

        assert_eq!(scheduler.run_now(TIER_RECLASSIFY_JOB).await, Some(JobResult::Success));
        let status = scheduler.registry().get_status(TIER_RECLASSIFY_JOB).unwrap();
        assert_eq!(status.last_run_metadata["examined"], "2");
        assert_eq!(status.last_run_metadata["demoted"], "2");
        assert_eq!(status.last_run_metadata["cold"], "2");

        for reference in store.references_for_owner("doc-a").unwrap() {
            assert_eq!(store.get(&reference.fingerprint).unwrap().unwrap().tier, Tier::Cold);
        }
    }

    #[test]
    fn test_config_follows_tiering_cron() {
        let tiering = TieringConfig {
            cron: "0 15 * * * *".to_string(),
            ..Default::default()
        };
        assert_eq!(TierReclassifyJobConfig::from(&tiering).cron, "0 15 * * * *");
    }
}
