//! Resource-lock contract consumed by the election engine.
//!
//! A lock backend maps the shared [`LeaseRecord`](crate::lease::LeaseRecord)
//! onto a single backend object with a conditional write: a Kubernetes
//! Lease keyed by `resourceVersion`, a Git file guarded by push rejection,
//! an S3 object guarded by its ETag, or the gossip key-value store guarded
//! by last-writer-wins timestamps. The engine is polymorphic over this
//! contract only; backends are independent variants.

mod errors;
mod memory_lock;
mod store;

pub use errors::{LockError, Result};
pub use memory_lock::MemoryLock;
pub use store::LeaderLock;
