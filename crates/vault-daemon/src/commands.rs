//! Command implementations for the `vault` binary.
//!
//! Every command opens the vault, does one thing, closes the vault and
//! returns a JSON document for `main` to print. `start` is the exception:
//! it keeps the vault open and runs the maintenance scheduler until
//! SIGINT or SIGTERM.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::signal;
use tracing::{info, warn};

use vault_engine::{
    CleanupOptions, FileOwnerDirectory, InMemoryOwnerDirectory, OwnerDirectory, OwnerScope,
    ReportType, VectorVault,
};
use vault_scheduler::jobs::{
    register_orphan_sweep_job, register_tier_reclassify_job, OrphanSweepJobConfig,
    TierReclassifyJobConfig, ORPHAN_SWEEP_JOB, TIER_RECLASSIFY_JOB,
};
use vault_scheduler::{SchedulerConfig, SchedulerService};
use vault_types::{Chunk, Settings};

use crate::cli::{AdminCommands, Commands};

/// Load layered configuration and apply CLI overrides.
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. Logs go to stderr so stdout
/// stays machine-readable.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Owner directory for the reaper.
///
/// Without `reaper.owners_file` no owner can be confirmed live or gone, so
/// sweeps skip every owner and only explicitly released content is
/// reclaimed.
pub fn owner_directory(settings: &Settings) -> Arc<dyn OwnerDirectory> {
    match &settings.reaper.owners_file {
        Some(path) => Arc::new(FileOwnerDirectory::new(path)),
        None => {
            let directory = InMemoryOwnerDirectory::new();
            directory.set_unreachable(true);
            Arc::new(directory)
        }
    }
}

async fn open_vault(settings: &Settings) -> Result<Arc<VectorVault>> {
    info!(db_path = %settings.db_path, backend = ?settings.similarity.backend, "Opening vault");
    let vault = VectorVault::open(settings.clone(), owner_directory(settings))
        .await
        .context("Failed to open vault")?;
    Ok(Arc::new(vault))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize result")
}

/// Read a chunk batch: a JSON array of `{text, vector, metadata}`.
pub fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read chunks from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&raw).with_context(|| format!("Invalid chunk file {}", path.display()))
}

/// Run a one-shot command. Returns `None` for `start`, which has no
/// result document.
pub async fn run_command(settings: &Settings, command: Commands) -> Result<Option<Value>> {
    if let Commands::Start { run_now } = command {
        start_scheduler(settings, run_now).await?;
        return Ok(None);
    }

    let vault = open_vault(settings).await?;
    let outcome = dispatch(&vault, command).await;
    // Close even when the command failed
    if let Err(e) = vault.close() {
        warn!(error = %e, "Failed to close vault cleanly");
    }
    outcome.map(Some)
}

async fn dispatch(vault: &VectorVault, command: Commands) -> Result<Value> {
    match command {
        Commands::Ingest { owner, file } => {
            let chunks = read_chunks(&file)?;
            let result = vault.ingest(&owner, chunks).await.context("Ingestion failed")?;
            to_json(&result)
        }
        Commands::Query { vector, top_k, owners } => {
            let scope = if owners.is_empty() {
                OwnerScope::All
            } else {
                OwnerScope::owners(owners)
            };
            let hits = vault.query(scope, vector, top_k).await.context("Query failed")?;
            to_json(&hits)
        }
        Commands::ReleaseOwner { owner } => {
            let result = vault.release_owner(&owner).await.context("Release failed")?;
            to_json(&result)
        }
        Commands::Admin { command } => handle_admin(vault, command).await,
        Commands::Start { .. } => anyhow::bail!("start is not a one-shot command"),
    }
}

/// Administrative commands.
pub async fn handle_admin(vault: &VectorVault, command: AdminCommands) -> Result<Value> {
    match command {
        AdminCommands::Stats => to_json(&vault.stats().context("Failed to read stats")?),
        AdminCommands::Analyze => to_json(&vault.analyze().await.context("Analysis failed")?),
        AdminCommands::Cleanup {
            dry_run,
            max_age_processing_days,
            max_age_analytics_days,
            batch_size,
        } => {
            let mut options = CleanupOptions::from_config(&vault.settings().reaper).with_dry_run(dry_run);
            if let Some(days) = max_age_processing_days {
                options.max_age_processing_days = days;
            }
            if let Some(days) = max_age_analytics_days {
                options.max_age_analytics_days = days;
            }
            if let Some(size) = batch_size {
                options.batch_size = size;
            }
            to_json(&vault.cleanup(options).await.context("Cleanup failed")?)
        }
        AdminCommands::EmergencyCleanup => {
            warn!("Running emergency cleanup");
            to_json(&vault.emergency_cleanup().await.context("Emergency cleanup failed")?)
        }
        AdminCommands::Report { report_type } => {
            let report_type: ReportType = report_type.parse()?;
            to_json(
                &vault
                    .optimization_report(report_type)
                    .await
                    .context("Report generation failed")?,
            )
        }
        AdminCommands::Reclassify => to_json(&vault.reclassify().await.context("Reclassification failed")?),
        AdminCommands::Compact => {
            vault.compact().context("Compaction failed")?;
            Ok(json!({ "compacted": true }))
        }
        AdminCommands::RebuildIndex => to_json(
            &vault
                .rebuild_similarity()
                .await
                .context("Index rebuild failed")?,
        ),
    }
}

/// Run the maintenance scheduler until a shutdown signal arrives.
pub async fn start_scheduler(settings: &Settings, run_now: bool) -> Result<()> {
    let vault = open_vault(settings).await?;
    let mut scheduler = SchedulerService::new(SchedulerConfig::from(&settings.scheduler))
        .await
        .context("Failed to create scheduler")?;

    register_orphan_sweep_job(&scheduler, Arc::clone(&vault), OrphanSweepJobConfig::from(&settings.reaper))
        .await
        .context("Failed to register orphan sweep")?;
    register_tier_reclassify_job(
        &scheduler,
        Arc::clone(&vault),
        TierReclassifyJobConfig::from(&settings.tiering),
    )
    .await
    .context("Failed to register tier reclassification")?;

    if run_now {
        for job in [TIER_RECLASSIFY_JOB, ORPHAN_SWEEP_JOB] {
            if let Some(result) = scheduler.run_now(job).await {
                info!(job, ?result, "Initial run finished");
            }
        }
    }

    scheduler.start().await.context("Failed to start scheduler")?;
    info!(
        reaper_cron = %settings.reaper.cron,
        tiering_cron = %settings.tiering.cron,
        "Vault maintenance running, Ctrl+C to stop"
    );

    shutdown_signal().await;

    scheduler.shutdown().await.context("Scheduler shutdown failed")?;
    for status in scheduler.registry().get_all_status() {
        info!(
            job = %status.job_name,
            runs = status.run_count,
            errors = status.error_count,
            skipped = status.skip_count,
            "Job summary"
        );
    }
    vault.close().context("Failed to close vault")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
