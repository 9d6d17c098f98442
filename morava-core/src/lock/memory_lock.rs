use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use super::errors::{LockError, Result};
use super::store::LeaderLock;
use crate::lease::LeaseRecord;

#[derive(Debug, Default)]
struct Stored {
    record: LeaseRecord,
    raw: Vec<u8>,
    version: u64,
}

/// In-memory [`LeaderLock`] with version-counter conditional writes.
/// SHOULD BE USED ONLY FOR TESTING PURPOSES.
///
/// Every write bumps an internal version; `update` is rejected with
/// `Conflict` unless this handle observed the current version through its
/// latest `get`. This is the same observed-version discipline a
/// Kubernetes-Lease, Git or S3 backend follows with resourceVersion,
/// HEAD and ETag respectively.
#[derive(Debug)]
pub struct MemoryLock {
    shared: Arc<Mutex<Option<Stored>>>,
    observed: AtomicU64,
    name: String,
    id: String,
}

impl MemoryLock {
    pub fn new(name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(None)),
            observed: AtomicU64::new(0),
            name: name.into(),
            id: identity.into(),
        }
    }

    /// Creates a sibling handle over the same lock object for a different
    /// candidate identity, with its own observed version.
    pub fn attach(&self, identity: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            observed: AtomicU64::new(0),
            name: self.name.clone(),
            id: identity.into(),
        }
    }
}

#[async_trait]
impl LeaderLock for MemoryLock {
    async fn get(&self) -> Result<(LeaseRecord, Vec<u8>)> {
        let guard = self.shared.lock().unwrap();
        match guard.as_ref() {
            Some(stored) => {
                self.observed.store(stored.version, Ordering::Release);
                Ok((stored.record.clone(), stored.raw.clone()))
            }
            None => Err(LockError::NotFound(self.name.clone())),
        }
    }

    async fn create(&self, record: &LeaseRecord) -> Result<()> {
        let raw = serde_json::to_vec(record)?;
        let mut guard = self.shared.lock().unwrap();
        if guard.is_some() {
            return Err(LockError::Conflict(format!(
                "lock {} already exists",
                self.name
            )));
        }
        *guard = Some(Stored {
            record: record.clone(),
            raw,
            version: 1,
        });
        self.observed.store(1, Ordering::Release);
        Ok(())
    }

    async fn update(&self, record: &LeaseRecord) -> Result<()> {
        let raw = serde_json::to_vec(record)?;
        let mut guard = self.shared.lock().unwrap();
        let stored = guard
            .as_mut()
            .ok_or_else(|| LockError::NotFound(self.name.clone()))?;
        if stored.version != self.observed.load(Ordering::Acquire) {
            return Err(LockError::Conflict(format!(
                "lock {} changed since last read",
                self.name
            )));
        }
        stored.record = record.clone();
        stored.raw = raw;
        stored.version += 1;
        self.observed.store(stored.version, Ordering::Release);
        Ok(())
    }

    fn record_event(&self, note: &str) {
        info!(target: "memory_lock", name = %self.name, identity = %self.id, "record event: {note}");
    }

    fn identity(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> String {
        format!("memory/{}", self.name)
    }
}
