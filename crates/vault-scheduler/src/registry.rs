//! Run history for registered jobs.
//!
//! The registry is what `vault start` reports on shutdown and what tests
//! inspect: last run, duration, outcome, run and error counts, and the
//! metadata the job attached to its last run (entries deleted, tiers
//! changed and so on).

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum JobResult {
    Success,
    Failed(String),
    Skipped(String),
}

/// Key-value stats a job reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    pub metadata: BTreeMap<String, String>,
}

impl JobOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub error_count: u64,
    pub skip_count: u64,
    pub is_running: bool,
    #[serde(default)]
    pub last_run_metadata: BTreeMap<String, String>,
}

impl JobStatus {
    fn new(job_name: &str, cron_expr: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            cron_expr: cron_expr.to_string(),
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            skip_count: 0,
            is_running: false,
            last_run_metadata: BTreeMap::new(),
        }
    }
}

/// Thread-safe map of job name to [`JobStatus`].
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking job must not wedge status reporting
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register or reset a job.
    pub fn register(&self, job_name: &str, cron_expr: &str) {
        self.write()
            .insert(job_name.to_string(), JobStatus::new(job_name, cron_expr));
    }

    pub fn record_start(&self, job_name: &str) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.is_running = true;
        }
    }

    /// Record a finished tick. Skipped ticks do not touch the running flag
    /// of the run that caused the skip.
    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64, output: JobOutput) {
        let mut jobs = self.write();
        let Some(status) = jobs.get_mut(job_name) else {
            return;
        };
        match &result {
            JobResult::Skipped(_) => {
                status.skip_count += 1;
            }
            JobResult::Failed(_) => {
                status.is_running = false;
                status.run_count += 1;
                status.error_count += 1;
                status.last_run = Some(Utc::now());
                status.last_duration_ms = Some(duration_ms);
                status.last_run_metadata = output.metadata;
            }
            JobResult::Success => {
                status.is_running = false;
                status.run_count += 1;
                status.last_run = Some(Utc::now());
                status.last_duration_ms = Some(duration_ms);
                status.last_run_metadata = output.metadata;
            }
        }
        status.last_result = Some(result);
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.read().get(job_name).cloned()
    }

    /// All jobs, sorted by name.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.read().get(job_name).is_some_and(|s| s.is_running)
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.read().contains_key(job_name)
    }

    pub fn job_count(&self) -> usize {
        self.read().len()
    }
}
