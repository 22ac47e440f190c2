//! Scheduled orphan sweep.
//!
//! Runs the reaper's destructive cleanup with the configured retention
//! windows. Owners whose existence cannot be confirmed are skipped by the
//! reaper and picked up again on the next tick.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use vault_engine::{CleanupOptions, VectorVault};
use vault_types::ReaperConfig;

use crate::{JitterConfig, JobOutput, OverlapPolicy, SchedulerError, SchedulerService, TimeoutConfig};

pub const ORPHAN_SWEEP_JOB: &str = "orphan_sweep";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanSweepJobConfig {
    /// Default "0 0 3 * * *", 3 AM daily
    pub cron: String,
    /// `None` uses the scheduler default
    pub timezone: Option<String>,
    pub jitter_secs: u64,
    pub timeout_secs: u64,
    pub options: CleanupOptions,
}

impl Default for OrphanSweepJobConfig {
    fn default() -> Self {
        Self::from(&ReaperConfig::default())
    }
}

impl From<&ReaperConfig> for OrphanSweepJobConfig {
    fn from(config: &ReaperConfig) -> Self {
        Self {
            cron: config.cron.clone(),
            timezone: None,
            jitter_secs: 300,
            timeout_secs: 3600,
            options: CleanupOptions::from_config(config),
        }
    }
}

/// Register the orphan sweep. Overlap policy is `Skip`: a sweep still
/// running when the next tick fires keeps the store to itself.
pub async fn register_orphan_sweep_job(
    scheduler: &SchedulerService,
    vault: Arc<VectorVault>,
    config: OrphanSweepJobConfig,
) -> Result<(), SchedulerError> {
    let options = config.options.clone();
    scheduler
        .register_job_with_metadata(
            ORPHAN_SWEEP_JOB,
            &config.cron,
            config.timezone.as_deref(),
            OverlapPolicy::Skip,
            JitterConfig::new(config.jitter_secs),
            TimeoutConfig::new(config.timeout_secs),
            move || {
                let vault = Arc::clone(&vault);
                let options = options.clone();
                async move {
                    let result = vault
                        .cleanup(options)
                        .await
                        .map_err(|e| format!("Orphan sweep failed: {}", e))?;
                    if !result.success {
                        return Err(result.message);
                    }
                    info!(
                        assignments = result.assignments_deleted,
                        entries = result.entries_deleted,
                        history = result.history_records_deleted,
                        analytics = result.analytics_deleted,
                        skipped_owners = result.skipped_owners.len(),
                        "Orphan sweep completed"
                    );
                    Ok(JobOutput::new()
                        .with_metadata("assignments_deleted", result.assignments_deleted)
                        .with_metadata("entries_deleted", result.entries_deleted)
                        .with_metadata("history_records_deleted", result.history_records_deleted)
                        .with_metadata("analytics_deleted", result.analytics_deleted)
                        .with_metadata("storage_reclaimed_mb", format!("{:.4}", result.storage_reclaimed_mb))
                        .with_metadata("skipped_owners", result.skipped_owners.len()))
                }
            },
        )
        .await?;

    info!(cron = %config.cron, dry_run = config.options.dry_run, "Registered orphan sweep job");
    Ok(())
}
