//! Overlap handling for long-running jobs.
//!
//! A sweep over a large store can outlive its cron interval. Under
//! [`OverlapPolicy::Skip`] the next tick is recorded as skipped instead of
//! starting a second run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// At most one run at a time
    #[default]
    Skip,
    /// Every tick runs
    Concurrent,
}

/// Per-job running flag.
#[derive(Debug)]
pub struct OverlapGuard {
    running: Arc<AtomicBool>,
    policy: OverlapPolicy,
}

impl OverlapGuard {
    pub fn new(policy: OverlapPolicy) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            policy,
        }
    }

    /// `None` when the policy forbids starting another run now.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        match self.policy {
            OverlapPolicy::Skip => self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .ok()
                .map(|_| RunGuard {
                    flag: Arc::clone(&self.running),
                }),
            OverlapPolicy::Concurrent => Some(RunGuard {
                flag: Arc::new(AtomicBool::new(true)),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }
}

/// Clears the running flag on drop, including on panic unwind.
#[derive(Debug)]
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_skip_blocks_second_run() {
        let guard = OverlapGuard::new(OverlapPolicy::Skip);
        let first = guard.try_acquire();
        assert!(first.is_some());
        assert!(guard.is_running());
        assert!(guard.try_acquire().is_none());

        drop(first);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_concurrent_never_blocks() {
        let guard = OverlapGuard::new(OverlapPolicy::Concurrent);
        let runs: Vec<_> = (0..3).map(|_| guard.try_acquire()).collect();
        assert!(runs.iter().all(Option::is_some));
        assert_eq!(guard.policy(), OverlapPolicy::Concurrent);
    }

    #[test]
    fn test_skip_admits_one_holder_across_threads() {
        let guard = Arc::new(OverlapGuard::new(OverlapPolicy::Skip));
        let held = guard.try_acquire().unwrap();
        let admitted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    if guard.try_acquire().is_some() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 0);
        drop(held);
        assert!(!guard.is_running());
    }

    #[test]
    fn test_policy_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OverlapPolicy::Skip).unwrap(), "\"skip\"");
        assert_eq!(OverlapPolicy::default(), OverlapPolicy::Skip);
    }
}
