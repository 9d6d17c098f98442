use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock time in milliseconds since the Unix epoch.
///
/// All lease timestamps are stamped with this helper so that every
/// participant works at the same (millisecond) granularity.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// The lease stored under a resource lock.
///
/// The record is serialised as compact JSON with fixed field names; the
/// casing below is part of the wire contract and must not change, as
/// existing deployments parse it.
///
/// The information carried here should be used for observational purposes
/// only: the election engine decides leadership from the holder identity
/// and the renew/duration window, nothing else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Identity that owns the lease. Empty means nobody owns it and any
    /// candidate may acquire. Set to empty when a holder voluntarily
    /// steps down.
    #[serde(rename = "holderIdentity")]
    pub holder_identity: String,

    /// Validity window, in milliseconds, counted from `renew_time`.
    #[serde(rename = "leaseDurationMilliSeconds")]
    pub lease_duration_ms: i64,

    /// Epoch millis at which the current holder first took the lease.
    #[serde(rename = "acquireTime")]
    pub acquire_time: i64,

    /// Epoch millis of the most recent renewal.
    #[serde(rename = "renewTime")]
    pub renew_time: i64,

    /// Count of distinct holders observed over the lifetime of the lock.
    /// Never decreases; a holder renewing its own lease does not bump it.
    #[serde(rename = "leaderTransitions")]
    pub leader_transitions: u32,
}

impl LeaseRecord {
    pub fn has_holder(&self) -> bool {
        !self.holder_identity.is_empty()
    }

    /// A lease is held when it names a holder and the validity window has
    /// not elapsed at `now_ms`.
    pub fn is_held(&self, now_ms: i64) -> bool {
        self.has_holder() && now_ms - self.renew_time < self.lease_duration_ms
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        !self.is_held(now_ms)
    }
}
