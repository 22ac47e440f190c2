//! Owner existence lookups.
//!
//! Owners (documents, knowledge items) live outside the vault. The reaper
//! asks the owning application through `OwnerDirectory` whether an owner is
//! still alive. An `Err` means the answer is unknown, and the reaper must not
//! treat that owner as gone.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::{debug, warn};

/// Trait for owner existence checks (to allow mocking).
#[async_trait::async_trait]
pub trait OwnerDirectory: Send + Sync {
    /// Whether the owner still exists. `Err` when the lookup is inconclusive.
    async fn owner_exists(&self, owner_id: &str) -> Result<bool, String>;

    /// Called once at the start of every sweep.
    async fn refresh(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Owner set held in memory. Used by tests and embedding applications.
#[derive(Debug, Default)]
pub struct InMemoryOwnerDirectory {
    owners: RwLock<HashSet<String>>,
    unreachable: AtomicBool,
}

impl InMemoryOwnerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owners<I, S>(owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directory = Self::new();
        for owner in owners {
            directory.register(owner);
        }
        directory
    }

    pub fn register(&self, owner_id: impl Into<String>) {
        if let Ok(mut owners) = self.owners.write() {
            owners.insert(owner_id.into());
        }
    }

    pub fn remove(&self, owner_id: &str) -> bool {
        self.owners
            .write()
            .map(|mut owners| owners.remove(owner_id))
            .unwrap_or(false)
    }

    /// Simulate the owning application being down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl OwnerDirectory for InMemoryOwnerDirectory {
    async fn owner_exists(&self, owner_id: &str) -> Result<bool, String> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err("owner directory unreachable".to_string());
        }
        self.owners
            .read()
            .map(|owners| owners.contains(owner_id))
            .map_err(|_| "owner set lock poisoned".to_string())
    }
}

/// Owner set read from a file with one owner id per line.
///
/// Blank lines and lines starting with `#` are ignored. The file is re-read
/// at the start of each sweep; if it cannot be read, every lookup is
/// inconclusive until the next successful refresh.
#[derive(Debug)]
pub struct FileOwnerDirectory {
    path: PathBuf,
    owners: RwLock<Option<HashSet<String>>>,
}

impl FileOwnerDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owners: RwLock::new(None),
        }
    }

    fn parse(contents: &str) -> HashSet<String> {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait::async_trait]
impl OwnerDirectory for FileOwnerDirectory {
    async fn owner_exists(&self, owner_id: &str) -> Result<bool, String> {
        let owners = self
            .owners
            .read()
            .map_err(|_| "owner set lock poisoned".to_string())?;
        match owners.as_ref() {
            Some(set) => Ok(set.contains(owner_id)),
            None => Err(format!("owners file {} not loaded", self.path.display())),
        }
    }

    async fn refresh(&self) -> Result<(), String> {
        let loaded = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Some(Self::parse(&contents)),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read owners file");
                None
            }
        };
        let ok = loaded.is_some();
        if let Some(set) = &loaded {
            debug!(path = ?self.path, owners = set.len(), "Loaded owners file");
        }
        let mut owners = self
            .owners
            .write()
            .map_err(|_| "owner set lock poisoned".to_string())?;
        *owners = loaded;
        if ok {
            Ok(())
        } else {
            Err(format!("cannot read owners file {}", self.path.display()))
        }
    }
}
