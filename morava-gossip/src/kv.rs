use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::broadcast::TransmitLimitedQueue;
use crate::cluster::{Cluster, ClusterConfig};
use crate::delegate::KvDelegate;
use crate::errors::{GossipError, Result};

/// Leave announcements get this long before the substrate is torn down.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Context-free key-value contract the gossip lock adapter consumes.
///
/// Writes are confirmed: `set` resolves once at least one peer
/// acknowledged the value (or the node is alone), and `get` never returns
/// a value peers have not acknowledged.
#[async_trait]
pub trait KeyValue: Send + Sync + 'static {
    /// Fails with [`GossipError::NotFound`] for absent keys.
    async fn get(&self, key: &str) -> Result<Bytes>;
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Leaves the cluster gracefully and shuts the substrate down.
    async fn close(&self) -> Result<()>;
}

/// The gossip-backed eventually-consistent KV store.
pub struct GossipKv {
    delegate: Arc<KvDelegate>,
    cluster: Cluster,
}

impl GossipKv {
    /// Starts a cluster node and joins the configured seeds. The
    /// retransmit multiplier is widened to the seed count and the number
    /// of peers actually joined, so small clusters propagate reliably.
    pub async fn create(config: ClusterConfig) -> Result<GossipKv> {
        let nodes = Arc::new(AtomicUsize::new(1));
        let queue = Arc::new(TransmitLimitedQueue::new(
            config.retransmit_mult.max(config.seeds.len()),
            nodes.clone(),
        ));
        let delegate = Arc::new(KvDelegate::new(queue));
        let seeds = config.seeds.clone();
        let cluster = Cluster::start(config, delegate.clone(), nodes).await?;
        let joined = cluster.join(&seeds).await?;
        delegate.queue().widen_retransmit_mult(joined);
        Ok(GossipKv { delegate, cluster })
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }
}

impl std::fmt::Debug for GossipKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipKv")
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyValue for GossipKv {
    async fn get(&self, key: &str) -> Result<Bytes> {
        trace!(target: "gossip_kv", key, "get");
        match self.delegate.get(key).await? {
            Some(value) => Ok(value),
            None => Err(GossipError::NotFound(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        trace!(target: "gossip_kv", key, "set");
        self.delegate.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        trace!(target: "gossip_kv", key, "delete");
        self.delegate.delete(key).await
    }

    async fn close(&self) -> Result<()> {
        self.cluster.leave(LEAVE_TIMEOUT).await;
        self.cluster.shutdown();
        Ok(())
    }
}
