//! Gossip-backed eventually-consistent key-value store with confirmed
//! writes, and the leader-election lock backend built on it.
//!
//! A [`GossipKv`] node replicates a last-writer-wins map over a compact
//! membership substrate (UDP gossip plus TCP push/pull anti-entropy).
//! Local writes resolve once a peer echoes them back (immediately on a
//! single-node cluster), which gives the [`GossipLock`] adapter the
//! read-your-cluster's-writes behavior the election engine needs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use morava_gossip::{ClusterConfig, GossipKv, GossipLock};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClusterConfig {
//!     bind_addr: "0.0.0.0:7946".parse()?,
//!     seeds: vec!["peer-1:7946".to_string(), "peer-2:7946".to_string()],
//!     ..ClusterConfig::default()
//! };
//! let kv = Arc::new(GossipKv::create(config).await?);
//! let lock = GossipLock::new(kv, "my-service", "node-1");
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod broadcast;
pub mod cluster;
mod delegate;
pub mod entry;
mod errors;
mod kv;
mod lock;

pub use cluster::{Cluster, ClusterConfig, Delegate, NodeInfo};
pub use errors::{GossipError, Result};
pub use kv::{GossipKv, KeyValue};
pub use lock::GossipLock;

#[cfg(test)]
mod action_test;
#[cfg(test)]
mod broadcast_test;
#[cfg(test)]
mod delegate_test;
