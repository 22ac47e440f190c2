//! Background maintenance scheduler for the knowledge vault.
//!
//! Wraps `tokio-cron-scheduler` with timezone-aware cron jobs, an overlap
//! guard, start jitter, per-run timeouts and a registry of run outcomes.
//! The [`jobs`] module registers the vault's periodic work: the orphan
//! sweep and tier reclassification.
//!
//! # Example
//!
//! ```ignore
//! use vault_scheduler::{jobs, SchedulerConfig, SchedulerService};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::from(&settings.scheduler)).await?;
//! jobs::register_orphan_sweep_job(&scheduler, vault.clone(), OrphanSweepJobConfig::from(&settings.reaper)).await?;
//! jobs::register_tier_reclassify_job(&scheduler, vault.clone(), TierReclassifyJobConfig::from(&settings.tiering)).await?;
//! scheduler.start().await?;
//!
//! let status = scheduler.registry().get_status("orphan_sweep");
//! ```

mod config;
mod error;
mod jitter;
mod overlap;
mod registry;
mod scheduler;

pub mod jobs;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use jitter::{with_jitter, JitterConfig, TimeoutConfig};
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use registry::{JobOutput, JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, SchedulerService};
