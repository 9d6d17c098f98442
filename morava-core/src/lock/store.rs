use async_trait::async_trait;

use super::errors::Result;
use crate::lease::LeaseRecord;

/// Common interface for locking on arbitrary resources used in leader
/// election. Implementations hide the backend details so they can change
/// over time; the election engine is the only intended consumer.
#[async_trait]
pub trait LeaderLock: Send + Sync + 'static {
    /// Returns the current lease record together with the raw bytes it was
    /// decoded from. Fails with [`LockError::NotFound`](super::LockError)
    /// when the lock object does not exist yet, which signals the create
    /// path.
    ///
    /// Backends with versioned objects refresh their cached version
    /// (resourceVersion, HEAD, ETag) as part of this call.
    async fn get(&self) -> Result<(LeaseRecord, Vec<u8>)>;

    /// Attempts to create the lock object with an initial record. Fails
    /// with `Conflict` when another candidate created it first.
    async fn create(&self, record: &LeaseRecord) -> Result<()>;

    /// Replaces the existing record. Backends with conditional writes must
    /// reject the update with `Conflict` when the object changed since this
    /// handle's last `get`.
    async fn update(&self, record: &LeaseRecord) -> Result<()>;

    /// Observational sink for election events (acquired, lost, stepped
    /// down). Implementations typically log or publish the note.
    fn record_event(&self, note: &str);

    /// The identity this handle competes with.
    fn identity(&self) -> &str;

    /// Human-readable description of the locked resource.
    fn describe(&self) -> String;
}
