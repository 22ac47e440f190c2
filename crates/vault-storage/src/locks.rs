//! Striped write locks.
//!
//! Every mutation of an entry or an owner position runs while holding the
//! stripe that its key hashes to. Multi-key transitions take all of their
//! stripes in ascending index order so two writers can never deadlock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use vault_types::Fingerprint;

use crate::error::StorageError;

/// Default stripe count
pub const DEFAULT_STRIPES: usize = 64;

/// Fixed pool of mutexes addressed by key hash.
pub struct StripedLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Stripe for a fingerprint
    pub fn fingerprint_stripe(&self, fingerprint: &Fingerprint) -> usize {
        (fingerprint.index_key() % self.stripes.len() as u64) as usize
    }

    /// Stripe for an owner position
    pub fn owner_stripe(&self, owner_id: &str, sequence: u32) -> usize {
        let mut hasher = DefaultHasher::new();
        owner_id.hash(&mut hasher);
        sequence.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Lock a set of stripes, deduplicated and in ascending order.
    pub fn lock(&self, stripes: &[usize]) -> Result<Vec<MutexGuard<'_, ()>>, StorageError> {
        let mut ordered: Vec<usize> = stripes.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for idx in ordered {
            let guard = self.stripes[idx]
                .lock()
                .map_err(|_| StorageError::LockPoisoned(format!("stripe {}", idx)))?;
            guards.push(guard);
        }
        Ok(guards)
    }

    /// Lock the single stripe of a fingerprint.
    pub fn lock_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<MutexGuard<'_, ()>>, StorageError> {
        self.lock(&[self.fingerprint_stripe(fingerprint)])
    }
}

impl Default for StripedLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
