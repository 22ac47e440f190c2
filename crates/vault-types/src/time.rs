//! Saturating conversions from configured ages to chrono durations.
//!
//! Ages arrive as unsigned integers from config and API options. Values past
//! chrono's range clamp to the widest representable span instead of panicking.

use chrono::{DateTime, Duration, Utc};

/// Seconds as a `Duration`, clamped to `Duration::MAX`.
pub fn duration_from_secs(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Days as a `Duration`, clamped to `Duration::MAX`.
pub fn duration_from_days(days: u32) -> Duration {
    Duration::try_days(i64::from(days)).unwrap_or(Duration::MAX)
}

/// `now - window`, clamped to the earliest representable instant.
pub fn cutoff_before(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_convert_exactly() {
        assert_eq!(duration_from_secs(90), Duration::seconds(90));
        assert_eq!(duration_from_days(7), Duration::days(7));
    }

    #[test]
    fn test_out_of_range_values_saturate() {
        assert_eq!(duration_from_secs(u64::MAX), Duration::MAX);
        assert_eq!(duration_from_days(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_cutoff_clamps_to_min() {
        let now = Utc::now();
        assert_eq!(cutoff_before(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(cutoff_before(now, duration_from_days(u32::MAX)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(cutoff_before(now, Duration::hours(1)), now - Duration::hours(1));
    }
}
