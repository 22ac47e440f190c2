//! Start jitter and run timeouts for scheduled jobs.
//!
//! Maintenance jobs share the store with foreground ingestion, so a sweep
//! scheduled at the top of the hour is spread by a random delay. A timeout
//! bounds how long a single run may hold the overlap guard.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound on the random delay before a run starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JitterConfig {
    /// 0 disables jitter
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }

    /// A delay in `[0, max_jitter_secs)`, millisecond resolution.
    pub fn generate_jitter(&self) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }
        let jitter_ms = rand::rng().random_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }
}

/// Sleep for a random jitter, then run `job_fn`.
pub async fn with_jitter<F, T>(jitter: &JitterConfig, job_fn: F) -> T
where
    F: Future<Output = T>,
{
    let delay = jitter.generate_jitter();
    if !delay.is_zero() {
        tracing::debug!(jitter_ms = delay.as_millis() as u64, "Applying jitter delay");
        tokio::time::sleep(delay).await;
    }
    job_fn.await
}

/// Maximum wall-clock time for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// 0 means no limit
    pub timeout_secs: u64,
}

impl TimeoutConfig {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn duration(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_jitter_is_zero() {
        let config = JitterConfig::none();
        assert!(!config.is_enabled());
        assert_eq!(config.generate_jitter(), Duration::ZERO);
    }

    #[test]
    fn test_jitter_within_bounds_and_varied() {
        let config = JitterConfig::new(5);
        let samples: Vec<Duration> = (0..500).map(|_| config.generate_jitter()).collect();
        assert!(samples.iter().all(|d| *d < Duration::from_secs(5)));

        let unique: std::collections::HashSet<u128> = samples.iter().map(|d| d.as_millis()).collect();
        assert!(unique.len() > 1);
    }

    #[tokio::test]
    async fn test_with_jitter_returns_value() {
        let result = with_jitter(&JitterConfig::none(), async { 7 }).await;
        assert_eq!(result, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_jitter_waits_at_most_max() {
        let start = tokio::time::Instant::now();
        with_jitter(&JitterConfig::new(2), async {}).await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_timeout_duration() {
        assert_eq!(TimeoutConfig::none().duration(), None);
        assert_eq!(TimeoutConfig::new(90).duration(), Some(Duration::from_secs(90)));
    }
}
