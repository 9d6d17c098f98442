use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use metrics::{counter, gauge};
use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use morava_core::{epoch_millis, LeaseRecord};

use crate::config::ElectionConfig;
use crate::errors::ElectionError;
use crate::metrics::{ELECTION_ACQUIRED_TOTAL, ELECTION_RENEW_FAILURES_TOTAL, ELECTION_STATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Observing the lock without holding it.
    Following,
    /// Holding a live lease.
    Leading,
    /// The engine has exited.
    Stopped,
}

/// The lease state machine: a single task that acquires, renews and
/// observes a [`LeaderLock`](morava_core::lock::LeaderLock), firing the
/// configured callbacks on transitions.
///
/// Backend errors never escalate out of the engine; they are logged and
/// the state machine decides what happens on the next tick. Leadership
/// is judged against the instant a record was first observed, not the
/// wall-clock timestamps inside it, so peer clock skew cannot expire a
/// lease early.
#[derive(Debug)]
pub struct LeaderElector {
    config: ElectionConfig,
    observed_record: Option<LeaseRecord>,
    observed_raw: Vec<u8>,
    observed_at: Option<Instant>,
    reported_leader: Option<String>,
    state_tx: watch::Sender<ElectionState>,
    leader_tx: watch::Sender<Option<String>>,
}

impl LeaderElector {
    /// Validates the timing invariants
    /// (`lease_duration > renew_deadline > retry_period > 0`) and builds
    /// the elector.
    pub fn new(config: ElectionConfig) -> Result<LeaderElector, ElectionError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ElectionState::Following);
        let (leader_tx, _) = watch::channel(None);
        Ok(LeaderElector {
            config,
            observed_record: None,
            observed_raw: Vec::new(),
            observed_at: None,
            reported_leader: None,
            state_tx,
            leader_tx,
        })
    }

    /// Observer for this elector's state; subscribe before calling
    /// [`LeaderElector::run`].
    pub fn watch_state(&self) -> watch::Receiver<ElectionState> {
        self.state_tx.subscribe()
    }

    /// Observer for the last leader identity this elector has seen.
    pub fn watch_leader(&self) -> watch::Receiver<Option<String>> {
        self.leader_tx.subscribe()
    }

    /// Runs the election until `cancel` fires or leadership is lost.
    ///
    /// The loop acquires the lease, fires `on_started_leading` with a
    /// child token tied to the leadership lifetime, renews every retry
    /// period, and fires `on_stopped_leading` exactly once on the way
    /// out. With `release_on_cancel`, cancellation while leading writes
    /// a single empty-holder record first.
    pub async fn run(mut self, cancel: CancellationToken) {
        let describe = self.config.lock.describe();
        info!(
            target: "elector",
            name = %self.config.name,
            lock = %describe,
            identity = %self.config.lock.identity(),
            "starting leader election"
        );
        self.set_state(ElectionState::Following);
        if self.acquire(&cancel).await {
            self.lead(&cancel).await;
        }
        self.set_state(ElectionState::Stopped);
        info!(target: "elector", name = %self.config.name, lock = %describe, "leader election stopped");
    }

    /// Follower loop: retry until the lease is ours or we are cancelled.
    async fn acquire(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if self.try_acquire_or_renew().await {
                self.report_transition();
                self.config.lock.record_event("became leader");
                info!(
                    target: "elector",
                    identity = %self.config.lock.identity(),
                    "successfully acquired lease"
                );
                return true;
            }
            self.report_transition();
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(jitter(self.config.retry_period)) => {}
            }
        }
    }

    async fn lead(&mut self, cancel: &CancellationToken) {
        self.set_state(ElectionState::Leading);
        counter!(ELECTION_ACQUIRED_TOTAL.name).increment(1);
        let leader_scope = cancel.child_token();

        let started = {
            let cb = &self.config.callbacks.on_started_leading;
            catch_unwind(AssertUnwindSafe(|| cb(leader_scope.clone()))).is_ok()
        };
        if started {
            self.renew_until_lost(cancel).await;
        } else {
            warn!(target: "elector", "on_started_leading panicked, relinquishing leadership");
        }

        if cancel.is_cancelled() && self.config.release_on_cancel {
            self.release().await;
        }
        leader_scope.cancel();
        {
            let cb = &self.config.callbacks.on_stopped_leading;
            if catch_unwind(AssertUnwindSafe(|| cb())).is_err() {
                warn!(target: "elector", "on_stopped_leading panicked");
            }
        }
        self.config.lock.record_event("stopped leading");
    }

    /// Leader loop: renew every retry period until cancelled, until the
    /// lock names another live holder, or until the renew deadline passes
    /// without a successful renewal.
    async fn renew_until_lost(&mut self, cancel: &CancellationToken) {
        let id = self.config.lock.identity().to_string();
        let mut last_renew = Instant::now();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(target: "elector", "cancelled while leading");
                    return;
                }
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
            // a backend write may block (a confirmed gossip write waits on
            // peers); bound each attempt so the deadline check always runs
            let renewed = match tokio::time::timeout(
                self.config.renew_deadline,
                self.try_acquire_or_renew(),
            )
            .await
            {
                Ok(renewed) => renewed,
                Err(_) => {
                    warn!(target: "elector", "renewal attempt timed out");
                    false
                }
            };
            if renewed {
                last_renew = Instant::now();
                self.report_transition();
                continue;
            }
            counter!(ELECTION_RENEW_FAILURES_TOTAL.name).increment(1);

            let usurped = self.observed_record.as_ref().is_some_and(|record| {
                record.has_holder()
                    && record.holder_identity != id
                    && !self.observed_lease_expired()
            });
            if usurped {
                self.report_transition();
                warn!(target: "elector", identity = %id, "lock was taken by another candidate, lost leadership");
                return;
            }
            if last_renew.elapsed() >= self.config.renew_deadline {
                warn!(target: "elector", identity = %id, "failed to renew lease within the renew deadline, lost leadership");
                return;
            }
            debug!(target: "elector", "failed to renew lease, retrying");
        }
    }

    /// One acquire-or-renew step. Returns true when the lock now holds a
    /// record naming this candidate.
    async fn try_acquire_or_renew(&mut self) -> bool {
        let lock = self.config.lock.clone();
        let id = lock.identity().to_string();
        let now_ms = epoch_millis();

        let (current, raw) = match lock.get().await {
            Ok(pair) => pair,
            Err(e) if e.is_not_found() => {
                let desired = LeaseRecord {
                    holder_identity: id,
                    lease_duration_ms: self.config.lease_duration.as_millis() as i64,
                    acquire_time: now_ms,
                    renew_time: now_ms,
                    leader_transitions: 0,
                };
                return match lock.create(&desired).await {
                    Ok(()) => {
                        self.observe(desired);
                        true
                    }
                    Err(e) => {
                        debug!(target: "elector", error = %e, "failed to create lock record");
                        false
                    }
                };
            }
            Err(e) => {
                warn!(target: "elector", error = %e, "failed to read lock record");
                return false;
            }
        };

        if raw != self.observed_raw {
            self.observed_record = Some(current.clone());
            self.observed_raw = raw;
            self.observed_at = Some(Instant::now());
        }

        if current.has_holder() && current.holder_identity != id && !self.observed_lease_expired() {
            debug!(
                target: "elector",
                holder = %current.holder_identity,
                "lock is held and has not yet expired"
            );
            return false;
        }

        // Expired, free, or already ours: write ourselves in. A holder
        // change bumps the transition count and restarts the acquire
        // time; renewing our own lease keeps both.
        let mut desired = current.clone();
        desired.holder_identity = id.clone();
        desired.lease_duration_ms = self.config.lease_duration.as_millis() as i64;
        desired.renew_time = now_ms;
        if current.holder_identity == id {
            desired.acquire_time = current.acquire_time;
        } else {
            desired.acquire_time = now_ms;
            desired.leader_transitions = current.leader_transitions + 1;
        }
        match lock.update(&desired).await {
            Ok(()) => {
                self.observe(desired);
                true
            }
            Err(e) => {
                info!(target: "elector", error = %e, "failed to update lock record");
                false
            }
        }
    }

    /// Best-effort step-down: write the record back with an empty holder
    /// so the next candidate can acquire without waiting out the lease.
    async fn release(&mut self) {
        let id = self.config.lock.identity().to_string();
        let Some(current) = self.observed_record.clone() else {
            return;
        };
        if current.holder_identity != id {
            return;
        }
        let now_ms = epoch_millis();
        let record = LeaseRecord {
            holder_identity: String::new(),
            lease_duration_ms: current.lease_duration_ms,
            acquire_time: now_ms,
            renew_time: now_ms,
            leader_transitions: current.leader_transitions,
        };
        let attempt = self.config.lock.update(&record);
        match tokio::time::timeout(self.config.retry_period, attempt).await {
            Ok(Ok(())) => {
                info!(target: "elector", identity = %id, "released lease");
                self.observe(record);
            }
            Ok(Err(e)) => warn!(target: "elector", error = %e, "failed to release lease"),
            Err(_) => warn!(target: "elector", "timed out releasing lease"),
        }
    }

    fn observe(&mut self, record: LeaseRecord) {
        self.observed_raw = serde_json::to_vec(&record).unwrap_or_default();
        self.observed_record = Some(record);
        self.observed_at = Some(Instant::now());
    }

    /// Whether the lease in the last observed record has run out, judged
    /// from the instant we first observed that record.
    fn observed_lease_expired(&self) -> bool {
        match self.observed_at {
            Some(at) => at.elapsed() >= self.config.lease_duration,
            None => true,
        }
    }

    /// Fires `on_new_leader` when the observed holder differs from the
    /// last one reported.
    fn report_transition(&mut self) {
        let holder = match &self.observed_record {
            Some(record) if record.has_holder() => record.holder_identity.clone(),
            _ => return,
        };
        if self.reported_leader.as_deref() == Some(holder.as_str()) {
            return;
        }
        info!(target: "elector", name = %self.config.name, leader = %holder, "observed new leader");
        self.reported_leader = Some(holder.clone());
        self.leader_tx.send_replace(Some(holder.clone()));
        let cb = &self.config.callbacks.on_new_leader;
        if catch_unwind(AssertUnwindSafe(|| cb(&holder))).is_err() {
            warn!(target: "elector", "on_new_leader panicked");
        }
    }

    fn set_state(&self, state: ElectionState) {
        if self.state_tx.send_replace(state) != state {
            let value = match state {
                ElectionState::Leading => 1.0,
                _ => 0.0,
            };
            gauge!(ELECTION_STATE.name).set(value);
        }
    }
}

/// Adds up to 50% random delay so candidates do not retry in lockstep.
fn jitter(period: Duration) -> Duration {
    let base = period.as_millis() as u64;
    if base == 0 {
        return period;
    }
    Duration::from_millis(rand::rng().random_range(base..=base + base / 2))
}
