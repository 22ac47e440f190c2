//! Orphan reaper.
//!
//! One sweep runs `SCAN -> MARK -> (DRY_RUN | DELETE) -> REPORT`:
//! - SCAN snapshots references, unreferenced entries, history and analytics,
//!   then asks the `OwnerDirectory` about every owner it saw. Owners whose
//!   status is unknown are skipped for this sweep.
//! - MARK unlinks orphaned references (decrementing and, at zero, marking
//!   their entries pending) and marks stranded zero-count entries.
//! - DRY_RUN computes the same plan without touching the store.
//! - DELETE removes pending entries (re-checked under the entry's lock) and
//!   stale history and analytics rows.
//!
//! At most one destructive sweep runs at a time; dry runs and `analyze` take
//! no guard.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vault_storage::{EntryFilter, VectorStore};
use vault_types::{
    cutoff_before, duration_from_days, duration_from_secs, validate_owner_id, AnalyticsEvent,
    AnalyticsKind, Fingerprint, OwnerReference, ProcessingRecord, ReaperConfig,
};

use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::owners::OwnerDirectory;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const OWNER_LOOKUP_CONCURRENCY: usize = 16;

/// Sweep state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepPhase {
    Scan,
    Mark,
    DryRun,
    Delete,
    Report,
}

/// Options for one cleanup sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOptions {
    pub max_age_processing_days: u32,
    pub max_age_analytics_days: u32,
    pub dry_run: bool,
    pub batch_size: usize,
    /// References younger than this are never treated as orphaned
    #[serde(default)]
    pub min_reference_age_secs: u64,
}

impl CleanupOptions {
    pub fn from_config(config: &ReaperConfig) -> Self {
        Self {
            max_age_processing_days: config.max_age_processing_days,
            max_age_analytics_days: config.max_age_analytics_days,
            dry_run: false,
            batch_size: config.batch_size,
            min_reference_age_secs: config.min_reference_age_secs,
        }
    }

    /// Tighter thresholds, destructive, no confirmation.
    pub fn emergency() -> Self {
        Self {
            max_age_processing_days: 7,
            max_age_analytics_days: 14,
            dry_run: false,
            batch_size: 500,
            min_reference_age_secs: 0,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.batch_size == 0 {
            return Err(EngineError::Validation("batchSize must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self::from_config(&ReaperConfig::default())
    }
}

/// Outcome of a cleanup sweep. In dry-run mode the counts are what a
/// destructive sweep would remove.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub assignments_deleted: u64,
    pub entries_deleted: u64,
    pub history_records_deleted: u64,
    pub analytics_deleted: u64,
    pub storage_reclaimed_mb: f64,
    pub execution_time_ms: u64,
    pub success: bool,
    pub message: String,
    pub dry_run: bool,
    /// Owners whose existence could not be determined this sweep
    pub skipped_owners: Vec<String>,
    #[serde(skip)]
    pub deleted_fingerprints: Vec<Fingerprint>,
}

/// Preview of what a sweep would find.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanAnalysis {
    pub orphaned_assignments: u64,
    pub orphaned_entries: u64,
    pub stale_processing_history: u64,
    pub old_analytics: u64,
    pub skipped_owners: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub estimated_storage_savings_mb: f64,
}

/// Result of releasing one owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResult {
    pub owner_id: String,
    pub references_released: u64,
    pub entries_marked_pending: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OwnerStatus {
    Live,
    Gone,
    Unknown,
}

/// Entry fields the planner needs, without the payload.
#[derive(Debug, Clone)]
struct EntrySummary {
    fingerprint: Fingerprint,
    reference_count: u64,
    pending: bool,
    created_at: DateTime<Utc>,
    row_bytes: u64,
}

/// Read-only view of the store taken during SCAN.
#[derive(Debug, Default)]
struct ScanSnapshot {
    references: Vec<OwnerReference>,
    entries: Vec<EntrySummary>,
    history: Vec<ProcessingRecord>,
    analytics: Vec<AnalyticsEvent>,
}

impl ScanSnapshot {
    fn load(store: &dyn VectorStore) -> Result<Self, EngineError> {
        let mut entries = Vec::new();
        for item in store.list(EntryFilter::unreferenced())? {
            let entry = item?;
            entries.push(EntrySummary {
                fingerprint: entry.fingerprint,
                reference_count: entry.reference_count,
                pending: entry.is_pending_deletion(),
                created_at: entry.created_at,
                row_bytes: row_bytes(entry.to_bytes()),
            });
        }
        let references = store.list_references()?;

        // Referenced entries matter only when an orphaned reference points at them
        let known: HashSet<Fingerprint> = entries.iter().map(|e| e.fingerprint).collect();
        let mut extra: HashSet<Fingerprint> = HashSet::new();
        for reference in &references {
            if !known.contains(&reference.fingerprint) {
                extra.insert(reference.fingerprint);
            }
        }
        for fingerprint in extra {
            if let Some(entry) = store.get(&fingerprint)? {
                entries.push(EntrySummary {
                    fingerprint,
                    reference_count: entry.reference_count,
                    pending: entry.is_pending_deletion(),
                    created_at: entry.created_at,
                    row_bytes: row_bytes(entry.to_bytes()),
                });
            }
        }

        Ok(Self {
            references,
            entries,
            history: store.list_history()?,
            analytics: store.list_analytics()?,
        })
    }

    fn owner_ids(&self) -> HashSet<String> {
        let mut owners: HashSet<String> = self.references.iter().map(|r| r.owner_id.clone()).collect();
        owners.extend(self.history.iter().map(|h| h.owner_id.clone()));
        owners.extend(self.analytics.iter().filter_map(|a| a.owner_id.clone()));
        owners
    }
}

fn row_bytes(encoded: Result<Vec<u8>, serde_json::Error>) -> u64 {
    encoded.map(|b| b.len() as u64).unwrap_or(0)
}

/// What a sweep would remove. Built without touching the store.
#[derive(Debug, Default)]
struct SweepPlan {
    orphaned_references: Vec<OwnerReference>,
    stranded: Vec<Fingerprint>,
    deletable_entries: Vec<Fingerprint>,
    stale_history: Vec<ProcessingRecord>,
    old_analytics: Vec<AnalyticsEvent>,
    skipped_owners: Vec<String>,
    estimated_bytes: u64,
}

impl SweepPlan {
    fn build(
        snapshot: &ScanSnapshot,
        owners: &HashMap<String, OwnerStatus>,
        options: &CleanupOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let gone = |owner: &str| matches!(owners.get(owner), Some(OwnerStatus::Gone));
        let reference_cutoff = cutoff_before(now, duration_from_secs(options.min_reference_age_secs));
        let history_cutoff = cutoff_before(now, duration_from_days(options.max_age_processing_days));
        let analytics_cutoff = cutoff_before(now, duration_from_days(options.max_age_analytics_days));

        let mut plan = SweepPlan::default();
        let mut skipped: Vec<String> = owners
            .iter()
            .filter(|(_, status)| matches!(status, OwnerStatus::Unknown))
            .map(|(owner, _)| owner.clone())
            .collect();
        skipped.sort();
        plan.skipped_owners = skipped;

        let mut remaining: HashMap<Fingerprint, u64> = snapshot
            .entries
            .iter()
            .map(|e| (e.fingerprint, e.reference_count))
            .collect();
        let mut decremented: HashSet<Fingerprint> = HashSet::new();

        for reference in &snapshot.references {
            if gone(&reference.owner_id) && reference.linked_at <= reference_cutoff {
                if let Some(count) = remaining.get_mut(&reference.fingerprint) {
                    *count = count.saturating_sub(1);
                }
                decremented.insert(reference.fingerprint);
                plan.estimated_bytes += row_bytes(reference.to_bytes());
                plan.orphaned_references.push(reference.clone());
            }
        }

        for entry in &snapshot.entries {
            if remaining.get(&entry.fingerprint).copied().unwrap_or(0) > 0 {
                continue;
            }
            let stranded = !entry.pending
                && entry.reference_count == 0
                && entry.created_at <= reference_cutoff;
            if stranded {
                plan.stranded.push(entry.fingerprint);
            }
            if entry.pending || stranded || decremented.contains(&entry.fingerprint) {
                plan.deletable_entries.push(entry.fingerprint);
                plan.estimated_bytes += entry.row_bytes;
            }
        }

        for record in &snapshot.history {
            if record.timestamp < history_cutoff || gone(&record.owner_id) {
                plan.estimated_bytes += row_bytes(record.to_bytes());
                plan.stale_history.push(record.clone());
            }
        }
        for event in &snapshot.analytics {
            let owner_gone = event.owner_id.as_deref().is_some_and(gone);
            if event.timestamp < analytics_cutoff || owner_gone {
                plan.estimated_bytes += row_bytes(event.to_bytes());
                plan.old_analytics.push(event.clone());
            }
        }

        plan
    }
}

/// Counts produced by the destructive phases.
#[derive(Debug, Default)]
struct ExecutionCounts {
    assignments_deleted: u64,
    entries_deleted: u64,
    history_deleted: u64,
    analytics_deleted: u64,
    bytes_reclaimed: u64,
    deleted_fingerprints: Vec<Fingerprint>,
    /// First storage error; the sweep stopped there
    error: Option<String>,
}

/// Resets the destructive-sweep flag when dropped.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SweepGuard(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Finds and removes orphaned references, entries and stale rows.
pub struct OrphanReaper {
    store: Arc<dyn VectorStore>,
    owners: Arc<dyn OwnerDirectory>,
    metrics: Arc<EngineMetrics>,
    config: ReaperConfig,
    delete_running: AtomicBool,
}

impl OrphanReaper {
    pub fn new(
        store: Arc<dyn VectorStore>,
        owners: Arc<dyn OwnerDirectory>,
        metrics: Arc<EngineMetrics>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            store,
            owners,
            metrics,
            config,
            delete_running: AtomicBool::new(false),
        }
    }

    /// Whether a destructive sweep is in progress.
    pub fn is_sweeping(&self) -> bool {
        self.delete_running.load(Ordering::SeqCst)
    }

    /// SCAN only, with the configured thresholds.
    pub async fn analyze(&self) -> Result<OrphanAnalysis, EngineError> {
        let options = CleanupOptions::from_config(&self.config).with_dry_run(true);
        let plan = self.scan(&options).await?;

        let mut actions = Vec::new();
        if !plan.orphaned_references.is_empty() {
            actions.push(format!(
                "Remove {} orphaned assignments",
                plan.orphaned_references.len()
            ));
        }
        if !plan.deletable_entries.is_empty() {
            actions.push(format!(
                "Reclaim {} unreferenced entries",
                plan.deletable_entries.len()
            ));
        }
        if !plan.stale_history.is_empty() {
            actions.push(format!(
                "Clean {} processing history records",
                plan.stale_history.len()
            ));
        }
        if !plan.old_analytics.is_empty() {
            actions.push(format!("Archive {} analytics events", plan.old_analytics.len()));
        }
        if !plan.skipped_owners.is_empty() {
            actions.push(format!(
                "Check owner directory: {} owners could not be verified",
                plan.skipped_owners.len()
            ));
        }
        if actions.is_empty() {
            actions.push("No cleanup needed".to_string());
        }

        Ok(OrphanAnalysis {
            orphaned_assignments: plan.orphaned_references.len() as u64,
            orphaned_entries: plan.deletable_entries.len() as u64,
            stale_processing_history: plan.stale_history.len() as u64,
            old_analytics: plan.old_analytics.len() as u64,
            skipped_owners: plan.skipped_owners,
            recommended_actions: actions,
            estimated_storage_savings_mb: plan.estimated_bytes as f64 / BYTES_PER_MB,
        })
    }

    /// Run one sweep. Failures are reported in the result, not as `Err`,
    /// except for invalid options.
    pub async fn cleanup(&self, options: CleanupOptions) -> Result<CleanupResult, EngineError> {
        options.validate()?;
        let start = Instant::now();

        let guard = if options.dry_run {
            None
        } else {
            match SweepGuard::try_acquire(&self.delete_running) {
                Some(guard) => Some(guard),
                None => {
                    EngineMetrics::incr(&self.metrics.sweeps_rejected, 1);
                    warn!("Cleanup rejected, another destructive sweep is running");
                    return Ok(CleanupResult {
                        success: false,
                        message: EngineError::SweepInProgress.to_string(),
                        execution_time_ms: start.elapsed().as_millis() as u64,
                        ..Default::default()
                    });
                }
            }
        };

        let mut result = CleanupResult {
            dry_run: options.dry_run,
            ..Default::default()
        };
        if let Err(e) = self.sweep(&options, &mut result).await {
            warn!(error = %e, "Cleanup sweep failed");
            result.success = false;
            result.message = format!("Cleanup failed: {}", e);
        }
        drop(guard);

        result.execution_time_ms = start.elapsed().as_millis() as u64;
        info!(
            phase = ?SweepPhase::Report,
            dry_run = result.dry_run,
            success = result.success,
            assignments = result.assignments_deleted,
            entries = result.entries_deleted,
            history = result.history_records_deleted,
            analytics = result.analytics_deleted,
            reclaimed_mb = result.storage_reclaimed_mb,
            duration_ms = result.execution_time_ms,
            "Cleanup sweep complete"
        );
        if result.success && !result.dry_run {
            EngineMetrics::incr(&self.metrics.sweeps_completed, 1);
            let event = AnalyticsEvent::new(AnalyticsKind::Cleanup, Utc::now())
                .with_count(result.entries_deleted)
                .with_duration_ms(result.execution_time_ms);
            if let Err(e) = self.store.record_analytics(&event) {
                warn!(error = %e, "Failed to record cleanup analytics");
            }
        }
        Ok(result)
    }

    /// `cleanup` with emergency thresholds.
    pub async fn emergency_cleanup(&self) -> Result<CleanupResult, EngineError> {
        warn!("Running emergency cleanup");
        self.cleanup(CleanupOptions::emergency()).await
    }

    /// The owning application reports an owner as deleted. Each reference
    /// is unlinked atomically; entries reaching zero are marked pending.
    pub async fn release_owner(&self, owner_id: &str) -> Result<ReleaseResult, EngineError> {
        validate_owner_id(owner_id)?;
        let store = Arc::clone(&self.store);
        let owner = owner_id.to_string();
        let (released, marked) = tokio::task::spawn_blocking(move || -> Result<(u64, u64), EngineError> {
            let mut released = 0;
            let mut marked = 0;
            for reference in store.references_for_owner(&owner)? {
                if let Some(outcome) = store.unlink_reference(&owner, reference.sequence)? {
                    released += 1;
                    if outcome.marked_pending {
                        marked += 1;
                    }
                }
            }
            Ok((released, marked))
        })
        .await??;

        let event = AnalyticsEvent::new(AnalyticsKind::Release, Utc::now())
            .with_owner(owner_id)
            .with_count(released);
        if let Err(e) = self.store.record_analytics(&event) {
            warn!(owner_id = %owner_id, error = %e, "Failed to record release analytics");
        }
        info!(owner_id = %owner_id, released, marked, "Released owner");
        Ok(ReleaseResult {
            owner_id: owner_id.to_string(),
            references_released: released,
            entries_marked_pending: marked,
        })
    }

    async fn sweep(&self, options: &CleanupOptions, result: &mut CleanupResult) -> Result<(), EngineError> {
        let plan = self.scan(options).await?;
        result.skipped_owners = plan.skipped_owners.clone();

        if options.dry_run {
            info!(phase = ?SweepPhase::DryRun, "Computing cleanup preview");
            result.assignments_deleted = plan.orphaned_references.len() as u64;
            result.entries_deleted = plan.deletable_entries.len() as u64;
            result.history_records_deleted = plan.stale_history.len() as u64;
            result.analytics_deleted = plan.old_analytics.len() as u64;
            result.storage_reclaimed_mb = plan.estimated_bytes as f64 / BYTES_PER_MB;
            result.success = true;
            result.message = format!(
                "Dry run: would remove {} assignments, {} entries, {} history records, {} analytics events",
                result.assignments_deleted,
                result.entries_deleted,
                result.history_records_deleted,
                result.analytics_deleted
            );
            return Ok(());
        }

        let store = Arc::clone(&self.store);
        let batch_size = options.batch_size;
        let counts = tokio::task::spawn_blocking(move || Self::execute(store.as_ref(), plan, batch_size)).await?;

        result.assignments_deleted = counts.assignments_deleted;
        result.entries_deleted = counts.entries_deleted;
        result.history_records_deleted = counts.history_deleted;
        result.analytics_deleted = counts.analytics_deleted;
        result.storage_reclaimed_mb = counts.bytes_reclaimed as f64 / BYTES_PER_MB;
        result.deleted_fingerprints = counts.deleted_fingerprints;
        let removed = format!(
            "{} assignments, {} entries, {} history records, {} analytics events",
            result.assignments_deleted,
            result.entries_deleted,
            result.history_records_deleted,
            result.analytics_deleted
        );
        match counts.error {
            None => {
                result.success = true;
                result.message = format!("Removed {}", removed);
            }
            Some(error) => {
                result.success = false;
                result.message = format!("Cleanup failed after removing {}: {}", removed, error);
            }
        }
        Ok(())
    }

    async fn scan(&self, options: &CleanupOptions) -> Result<SweepPlan, EngineError> {
        info!(phase = ?SweepPhase::Scan, dry_run = options.dry_run, "Starting orphan scan");
        let store = Arc::clone(&self.store);
        let snapshot = tokio::task::spawn_blocking(move || ScanSnapshot::load(store.as_ref())).await??;

        if let Err(e) = self.owners.refresh().await {
            warn!(error = %e, "Owner directory refresh failed");
        }
        let statuses = self.check_owners(snapshot.owner_ids()).await;
        let plan = SweepPlan::build(&snapshot, &statuses, options, Utc::now());
        debug!(
            orphaned = plan.orphaned_references.len(),
            deletable = plan.deletable_entries.len(),
            stranded = plan.stranded.len(),
            history = plan.stale_history.len(),
            analytics = plan.old_analytics.len(),
            skipped_owners = plan.skipped_owners.len(),
            "Scan complete"
        );
        Ok(plan)
    }

    /// Look up every owner once per sweep.
    async fn check_owners(&self, owner_ids: HashSet<String>) -> HashMap<String, OwnerStatus> {
        let cache: DashMap<String, OwnerStatus> = DashMap::new();
        stream::iter(owner_ids)
            .for_each_concurrent(OWNER_LOOKUP_CONCURRENCY, |owner_id| {
                let cache = &cache;
                async move {
                    let status = match self.owners.owner_exists(&owner_id).await {
                        Ok(true) => OwnerStatus::Live,
                        Ok(false) => OwnerStatus::Gone,
                        Err(reason) => {
                            let err = EngineError::OrphanSweep {
                                owner_id: owner_id.clone(),
                                reason,
                            };
                            warn!(error = %err, "Skipping owner for this sweep");
                            OwnerStatus::Unknown
                        }
                    };
                    cache.insert(owner_id, status);
                }
            })
            .await;
        cache.into_iter().collect()
    }

    /// Run MARK and DELETE. Stops at the first storage error; the counts
    /// always describe what was committed before it.
    fn execute(store: &dyn VectorStore, plan: SweepPlan, batch_size: usize) -> ExecutionCounts {
        let mut counts = ExecutionCounts::default();
        if let Err(e) = Self::run_phases(store, &plan, batch_size, &mut counts) {
            warn!(
                error = %e,
                assignments = counts.assignments_deleted,
                entries = counts.entries_deleted,
                "Sweep stopped early"
            );
            counts.error = Some(e.to_string());
        }
        counts
    }

    fn run_phases(
        store: &dyn VectorStore,
        plan: &SweepPlan,
        batch_size: usize,
        counts: &mut ExecutionCounts,
    ) -> Result<(), EngineError> {
        let now = Utc::now();

        info!(phase = ?SweepPhase::Mark, references = plan.orphaned_references.len(), "Marking orphans");
        for batch in plan.orphaned_references.chunks(batch_size) {
            for reference in batch {
                if let Some(outcome) = store.unlink_reference(&reference.owner_id, reference.sequence)? {
                    counts.assignments_deleted += 1;
                    counts.bytes_reclaimed += row_bytes(reference.to_bytes());
                    debug!(
                        owner_id = %reference.owner_id,
                        sequence = reference.sequence,
                        remaining = outcome.remaining,
                        "Unlinked orphaned reference"
                    );
                }
            }
        }
        for fingerprint in &plan.stranded {
            if store.mark_pending_deletion(fingerprint, now)? {
                debug!(fingerprint = %fingerprint.short(), "Marked stranded entry");
            }
        }

        info!(phase = ?SweepPhase::Delete, "Deleting marked entries and stale rows");
        let pending: Vec<Fingerprint> = store
            .list(EntryFilter::pending())?
            .map(|item| item.map(|e| e.fingerprint))
            .collect::<Result<_, _>>()?;
        for batch in pending.chunks(batch_size) {
            for fingerprint in batch {
                // Re-checked under the lock; a concurrent link wins
                if let Some(entry) = store.delete_if_orphaned(fingerprint)? {
                    counts.entries_deleted += 1;
                    counts.bytes_reclaimed += row_bytes(entry.to_bytes());
                    counts.deleted_fingerprints.push(*fingerprint);
                }
            }
        }

        for batch in plan.stale_history.chunks(batch_size) {
            let deleted = store.delete_history(batch)?;
            counts.history_deleted += deleted as u64;
            counts.bytes_reclaimed += batch.iter().map(|r| row_bytes(r.to_bytes())).sum::<u64>();
        }
        for batch in plan.old_analytics.chunks(batch_size) {
            let deleted = store.delete_analytics(batch)?;
            counts.analytics_deleted += deleted as u64;
            counts.bytes_reclaimed += batch.iter().map(|e| row_bytes(e.to_bytes())).sum::<u64>();
        }

        Ok(())
    }
}
