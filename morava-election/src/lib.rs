//! Lease-based leader election over pluggable resource locks.
//!
//! Every candidate runs a [`LeaderElector`]: a single task that reads the
//! shared lock, decides whether to acquire or yield, renews its lease
//! while leading, and fires the configured [`Callbacks`] on transitions.
//! Exactly one holder at a time is observable across the cluster as long
//! as the lock backend serialises each read-then-write step.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use morava_core::MemoryLock;
//! use morava_election::{Callbacks, ElectionConfig, LeaderElector};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ElectionConfig {
//!     lock: Arc::new(MemoryLock::new("my-service", "node-1")),
//!     lease_duration: Duration::from_secs(15),
//!     renew_deadline: Duration::from_secs(10),
//!     retry_period: Duration::from_secs(2),
//!     release_on_cancel: true,
//!     name: "my-service".to_string(),
//!     callbacks: Callbacks::logging(),
//! };
//! let elector = LeaderElector::new(config)?;
//! elector.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

mod config;
mod elector;
mod errors;
mod metrics;

pub use config::{Callbacks, ElectionConfig};
pub use elector::{ElectionState, LeaderElector};
pub use errors::ElectionError;
pub use metrics::describe_metrics;
