use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use morava_core::lock::LeaderLock;

use crate::errors::ElectionError;

/// Hooks the engine fires on leadership changes.
///
/// All three are required; construct with [`Callbacks::logging`] when
/// only some of them matter and overwrite the rest. Callbacks run on the
/// elector task, so they should hand real work off to their own tasks;
/// a panicking callback costs this candidate its leadership.
pub struct Callbacks {
    /// Fired once when leadership is acquired. The token is cancelled
    /// when leadership is lost or the engine stops; tie all
    /// leader-only work to it.
    pub on_started_leading: Box<dyn Fn(CancellationToken) + Send + Sync>,
    /// Fired exactly once when leadership ends, on every exit path.
    pub on_stopped_leading: Box<dyn Fn() + Send + Sync>,
    /// Fired whenever the observed holder changes to a new identity,
    /// including our own on acquisition.
    pub on_new_leader: Box<dyn Fn(&str) + Send + Sync>,
}

impl Callbacks {
    /// Callbacks that only log the transitions.
    pub fn logging() -> Callbacks {
        Callbacks {
            on_started_leading: Box::new(|_| info!(target: "elector", "started leading")),
            on_stopped_leading: Box::new(|| info!(target: "elector", "stopped leading")),
            on_new_leader: Box::new(|leader| {
                info!(target: "elector", leader = %leader, "new leader observed")
            }),
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

/// Timing and backend configuration for one [`LeaderElector`].
///
/// [`LeaderElector`]: crate::LeaderElector
pub struct ElectionConfig {
    /// The lock backend candidates compete over.
    pub lock: Arc<dyn LeaderLock>,
    /// How long a lease stays valid after its last renewal. Non-leading
    /// candidates wait this long after the last observed renewal before
    /// trying to take over.
    pub lease_duration: Duration,
    /// How long the leader keeps retrying a failing renewal before it
    /// gives up leadership. Must be shorter than `lease_duration`.
    pub renew_deadline: Duration,
    /// Sleep between acquire/renew attempts. Must be shorter than
    /// `renew_deadline`.
    pub retry_period: Duration,
    /// When cancelled while leading, write a single empty-holder record
    /// so the next candidate does not have to wait out the lease.
    pub release_on_cancel: bool,
    /// Name of this election, for logs and events.
    pub name: String,
    pub callbacks: Callbacks,
}

impl ElectionConfig {
    pub(crate) fn validate(&self) -> Result<(), ElectionError> {
        if self.retry_period.is_zero() {
            return Err(ElectionError::InvalidConfig(
                "retry_period must be greater than zero".to_string(),
            ));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(ElectionError::InvalidConfig(
                "renew_deadline must be greater than retry_period".to_string(),
            ));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(ElectionError::InvalidConfig(
                "lease_duration must be greater than renew_deadline".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ElectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectionConfig")
            .field("lock", &self.lock.describe())
            .field("name", &self.name)
            .field("lease_duration", &self.lease_duration)
            .field("renew_deadline", &self.renew_deadline)
            .field("retry_period", &self.retry_period)
            .field("release_on_cancel", &self.release_on_cancel)
            .finish_non_exhaustive()
    }
}
