use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, trace};

use morava_core::lock::{LeaderLock, LockError};
use morava_core::LeaseRecord;

use crate::errors::GossipError;
use crate::kv::KeyValue;

/// [`LeaderLock`] over the gossip KV: the lease record lives as compact
/// JSON under a single key.
///
/// The backing store is eventually consistent, so two candidates may
/// briefly both believe they hold the lock under a network partition;
/// last-writer-wins converges once the partition heals, and callers
/// detect the window through lease expiry. Pick lease durations
/// comfortably above the gossip convergence time.
pub struct GossipLock {
    kv: Arc<dyn KeyValue>,
    name: String,
    id: String,
}

impl GossipLock {
    pub fn new(kv: Arc<dyn KeyValue>, name: impl Into<String>, id: impl Into<String>) -> GossipLock {
        GossipLock {
            kv,
            name: name.into(),
            id: id.into(),
        }
    }

    /// Leaves the cluster and shuts the backing store down.
    pub async fn close(&self) -> Result<(), GossipError> {
        self.kv.close().await
    }
}

impl std::fmt::Debug for GossipLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipLock")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LeaderLock for GossipLock {
    async fn get(&self) -> Result<(LeaseRecord, Vec<u8>), LockError> {
        trace!(target: "gossip_lock", name = %self.name, "get");
        let raw = match self.kv.get(&self.name).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Err(LockError::NotFound(self.name.clone())),
            Err(e) => return Err(LockError::Transient(e.to_string())),
        };
        let record: LeaseRecord = serde_json::from_slice(&raw)?;
        Ok((record, raw.to_vec()))
    }

    async fn create(&self, record: &LeaseRecord) -> Result<(), LockError> {
        trace!(target: "gossip_lock", name = %self.name, "create");
        self.write(record).await
    }

    async fn update(&self, record: &LeaseRecord) -> Result<(), LockError> {
        trace!(target: "gossip_lock", name = %self.name, "update");
        self.write(record).await
    }

    fn record_event(&self, note: &str) {
        info!(target: "gossip_lock", name = %self.name, identity = %self.id, "record event: {note}");
    }

    fn identity(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> String {
        format!("gossip/{}", self.name)
    }
}

impl GossipLock {
    async fn write(&self, record: &LeaseRecord) -> Result<(), LockError> {
        let raw = serde_json::to_vec(record)?;
        self.kv
            .set(&self.name, Bytes::from(raw))
            .await
            .map_err(|e| LockError::Transient(e.to_string()))
    }
}
