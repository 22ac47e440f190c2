//! Scheduler service over `tokio-cron-scheduler`.
//!
//! Every registered job is wrapped in a tick that consults the overlap
//! guard, applies jitter, enforces the timeout, races the shutdown token
//! and writes the outcome into the [`JobRegistry`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::jitter::{with_jitter, JitterConfig, TimeoutConfig};
use crate::overlap::{OverlapGuard, OverlapPolicy};
use crate::registry::{JobOutput, JobRegistry, JobResult};
use crate::{SchedulerConfig, SchedulerError};

type TickFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = JobResult> + Send>> + Send + Sync>;

/// Check a 6-field cron expression (sec min hour day month weekday).
///
/// ```
/// use vault_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 0 3 * * *").is_ok());
/// assert!(validate_cron_expression("hourly").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", expr, e)))
}

/// One job's execution wrapper.
struct JobTick<F> {
    name: String,
    registry: Arc<JobRegistry>,
    guard: OverlapGuard,
    jitter: JitterConfig,
    timeout: TimeoutConfig,
    shutdown: CancellationToken,
    job_fn: F,
}

impl<F, Fut> JobTick<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobOutput, String>> + Send + 'static,
{
    async fn run(&self) -> JobResult {
        if self.shutdown.is_cancelled() {
            return self.skip("scheduler shutting down");
        }
        let Some(_running) = self.guard.try_acquire() else {
            return self.skip("previous run still active");
        };

        self.registry.record_start(&self.name);
        info!(job = %self.name, "Job started");
        let start = Instant::now();

        let work = with_jitter(&self.jitter, (self.job_fn)());
        let bounded = async {
            match self.timeout.duration() {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .unwrap_or_else(|_| Err(format!("timed out after {}s", limit.as_secs()))),
                None => work.await,
            }
        };
        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => Err("cancelled by shutdown".to_string()),
            result = bounded => result,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let (result, output) = match outcome {
            Ok(output) => {
                info!(job = %self.name, duration_ms, "Job completed");
                (JobResult::Success, output)
            }
            Err(reason) => {
                warn!(job = %self.name, duration_ms, error = %reason, "Job failed");
                (JobResult::Failed(reason), JobOutput::new())
            }
        };
        self.registry
            .record_complete(&self.name, result.clone(), duration_ms, output);
        result
    }

    fn skip(&self, reason: &str) -> JobResult {
        debug!(job = %self.name, reason, "Job tick skipped");
        let result = JobResult::Skipped(reason.to_string());
        self.registry
            .record_complete(&self.name, result.clone(), 0, JobOutput::new());
        result
    }
}

/// Lifecycle owner for the cron scheduler and its jobs.
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    ticks: Mutex<HashMap<String, TickFn>>,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
}

impl SchedulerService {
    /// Create a stopped scheduler. The default timezone is validated here.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.parse_timezone()?;
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            registry: Arc::new(JobRegistry::new()),
            ticks: Mutex::new(HashMap::new()),
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.scheduler.start().await?;
        info!(jobs = self.registry.job_count(), "Scheduler started");
        Ok(())
    }

    /// Cancel running jobs, wait up to `shutdown_timeout_secs` for them to
    /// wind down, then stop the cron loop.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_timeout_secs);
        while self.registry.get_all_status().iter().any(|s| s.is_running) {
            if Instant::now() >= deadline {
                warn!("Shutdown timeout reached with jobs still running");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Error during scheduler shutdown: {}", e);
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn parse_timezone(tz_str: &str) -> Result<Tz, SchedulerError> {
        tz_str
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(tz_str.to_string()))
    }

    /// Register a job that reports no metadata.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        overlap: OverlapPolicy,
        jitter: JitterConfig,
        timeout: TimeoutConfig,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.register_job_with_metadata(name, cron_expr, timezone, overlap, jitter, timeout, move || {
            let run = job_fn();
            async move { run.await.map(|_| JobOutput::new()) }
        })
        .await
    }

    /// Register a cron job whose runs report [`JobOutput`] metadata.
    ///
    /// # Errors
    ///
    /// Invalid cron expression or unknown timezone.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_job_with_metadata<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        overlap: OverlapPolicy,
        jitter: JitterConfig,
        timeout: TimeoutConfig,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobOutput, String>> + Send + 'static,
    {
        let tz: Tz = match timezone {
            Some(tz_str) => Self::parse_timezone(tz_str)?,
            None => self.config.parse_timezone()?,
        };
        validate_cron_expression(cron_expr)?;

        let tick = Arc::new(JobTick {
            name: name.to_string(),
            registry: Arc::clone(&self.registry),
            guard: OverlapGuard::new(overlap),
            jitter,
            timeout,
            shutdown: self.shutdown_token.clone(),
            job_fn,
        });
        let tick_fn: TickFn = Arc::new(move || {
            let tick = Arc::clone(&tick);
            Box::pin(async move { tick.run().await }) as Pin<Box<dyn Future<Output = JobResult> + Send>>
        });

        let scheduled = Arc::clone(&tick_fn);
        let job = Job::new_async_tz(cron_expr, tz, move |_uuid, _lock| {
            let tick_fn = Arc::clone(&scheduled);
            Box::pin(async move {
                tick_fn().await;
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let uuid = self.scheduler.add(job).await?;
        self.registry.register(name, cron_expr);
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), tick_fn);
        info!(job = %name, uuid = %uuid, cron = %cron_expr, timezone = %tz.name(), ?overlap, "Job registered");
        Ok(uuid)
    }

    /// Run one tick of a registered job immediately, outside its schedule.
    /// The overlap guard and registry apply as for a scheduled tick.
    pub async fn run_now(&self, name: &str) -> Option<JobResult> {
        let tick_fn = self
            .ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;
        Some(tick_fn().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn quick_config() -> SchedulerConfig {
        SchedulerConfig {
            shutdown_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_stop() {
        let mut scheduler = SchedulerService::new(quick_config()).await.unwrap();
        assert!(!scheduler.is_running());

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyRunning)));

        let token = scheduler.shutdown_token();
        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(token.is_cancelled());
        assert!(matches!(scheduler.shutdown().await, Err(SchedulerError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_timezone_config() {
        let config = SchedulerConfig {
            default_timezone: "Invalid/Zone".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            SchedulerService::new(config).await,
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(validate_cron_expression("0 0 3 * * *").is_ok());
        assert!(validate_cron_expression("0 0 * * * *").is_ok());
        assert!(validate_cron_expression("*/10 * * * * *").is_ok());
        assert!(validate_cron_expression("").is_err());
        assert!(validate_cron_expression("* * *").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_rejects_bad_input() {
        let scheduler = SchedulerService::new(quick_config()).await.unwrap();
        let bad_cron = scheduler
            .register_job("bad", "whenever", None, OverlapPolicy::Skip, JitterConfig::none(), TimeoutConfig::none(), || async { Ok(()) })
            .await;
        assert!(matches!(bad_cron, Err(SchedulerError::InvalidCron(_))));

        let bad_tz = scheduler
            .register_job("bad", "0 0 * * * *", Some("Nowhere/City"), OverlapPolicy::Skip, JitterConfig::none(), TimeoutConfig::none(), || async { Ok(()) })
            .await;
        assert!(matches!(bad_tz, Err(SchedulerError::InvalidTimezone(_))));
        assert_eq!(scheduler.registry().job_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_now_records_metadata() {
        let scheduler = SchedulerService::new(quick_config()).await.unwrap();
        scheduler
            .register_job_with_metadata(
                "counted",
                "0 0 * * * *",
                Some("America/New_York"),
                OverlapPolicy::Skip,
                JitterConfig::none(),
                TimeoutConfig::none(),
                || async { Ok(JobOutput::new().with_metadata("items", 3)) },
            )
            .await
            .unwrap();

        assert_eq!(scheduler.run_now("counted").await, Some(JobResult::Success));
        assert_eq!(scheduler.run_now("missing").await, None);

        let status = scheduler.registry().get_status("counted").unwrap();
        assert_eq!(status.run_count, 1);
        assert_eq!(status.last_run_metadata.get("items").map(String::as_str), Some("3"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overlapping_tick_is_skipped() {
        let scheduler = Arc::new(SchedulerService::new(quick_config()).await.unwrap());
        let release = Arc::new(tokio::sync::Notify::new());
        let started = Arc::new(tokio::sync::Notify::new());
        let runs = Arc::new(AtomicU32::new(0));

        let (r, s, n) = (Arc::clone(&release), Arc::clone(&started), Arc::clone(&runs));
        scheduler
            .register_job("slow", "0 0 * * * *", None, OverlapPolicy::Skip, JitterConfig::none(), TimeoutConfig::none(), move || {
                let (r, s, n) = (Arc::clone(&r), Arc::clone(&s), Arc::clone(&n));
                async move {
                    n.fetch_add(1, Ordering::SeqCst);
                    s.notify_one();
                    r.notified().await;
                    Ok(())
                }
            })
            .await
            .unwrap();

        let background = Arc::clone(&scheduler);
        let first = tokio::spawn(async move { background.run_now("slow").await });
        started.notified().await;

        let second = scheduler.run_now("slow").await;
        assert!(matches!(second, Some(JobResult::Skipped(_))));

        release.notify_one();
        assert_eq!(first.await.unwrap(), Some(JobResult::Success));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let status = scheduler.registry().get_status("slow").unwrap();
        assert_eq!(status.run_count, 1);
        assert_eq!(status.skip_count, 1);
        assert!(!status.is_running);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_marks_failure() {
        let scheduler = SchedulerService::new(quick_config()).await.unwrap();
        scheduler
            .register_job("stuck", "0 0 * * * *", None, OverlapPolicy::Skip, JitterConfig::none(), TimeoutConfig::new(1), || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap();

        let result = scheduler.run_now("stuck").await.unwrap();
        assert!(matches!(result, JobResult::Failed(reason) if reason.contains("timed out")));
        assert_eq!(scheduler.registry().get_status("stuck").unwrap().error_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_job_counts_error() {
        let scheduler = SchedulerService::new(quick_config()).await.unwrap();
        scheduler
            .register_job("broken", "0 0 * * * *", None, OverlapPolicy::Skip, JitterConfig::none(), TimeoutConfig::none(), || async {
                Err("store unavailable".to_string())
            })
            .await
            .unwrap();

        let result = scheduler.run_now("broken").await.unwrap();
        assert_eq!(result, JobResult::Failed("store unavailable".into()));
        let status = scheduler.registry().get_status("broken").unwrap();
        assert_eq!(status.error_count, 1);
        assert!(!status.is_running);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cron_fires_registered_job() {
        let mut scheduler = SchedulerService::new(quick_config()).await.unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        scheduler
            .register_job("every-second", "*/1 * * * * *", None, OverlapPolicy::Skip, JitterConfig::none(), TimeoutConfig::none(), move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await.unwrap();

        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
