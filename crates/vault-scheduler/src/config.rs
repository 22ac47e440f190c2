//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use vault_types::SchedulerSettings;

use crate::SchedulerError;

/// Runtime configuration for [`crate::SchedulerService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone used when a job does not name its own.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Seconds granted to running jobs after shutdown is signalled.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            default_timezone: settings.default_timezone.clone(),
            shutdown_timeout_secs: settings.shutdown_timeout_secs,
        }
    }
}

impl SchedulerConfig {
    /// Parse `default_timezone`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTimezone` for anything that is not an IANA
    /// identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.default_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.default_timezone.clone()))
    }
}
