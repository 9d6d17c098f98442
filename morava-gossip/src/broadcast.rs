use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::trace;

use crate::action::{Action, ActionType};

/// A pending gossip message paired with the key and mutation type it
/// carries, so newer writes can supersede older pending ones.
#[derive(Debug, Clone)]
pub struct ActionBroadcast {
    payload: Bytes,
    key: String,
    typ: ActionType,
}

impl ActionBroadcast {
    pub fn new(action: &Action) -> ActionBroadcast {
        ActionBroadcast {
            payload: action.encode(),
            key: action.key.clone(),
            typ: action.typ,
        }
    }

    /// Wraps already-encoded bytes (a message being relayed verbatim)
    /// together with its parsed reference.
    pub fn from_raw(payload: Bytes, action: &Action) -> ActionBroadcast {
        ActionBroadcast {
            payload,
            key: action.key.clone(),
            typ: action.typ,
        }
    }

    /// A pending broadcast is invalidated by a newer one for the same key
    /// and the same mutation type; retransmit slots are not wasted on
    /// writes that a later write already shadows.
    pub fn invalidates(&self, pending: &ActionBroadcast) -> bool {
        self.key == pending.key && self.typ == pending.typ
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

#[derive(Debug)]
struct Pending {
    broadcast: ActionBroadcast,
    transmits: usize,
}

/// Retransmit-limited broadcast queue.
///
/// Queued messages are drained least-transmitted first within a byte
/// budget and retired once their transmit count reaches
/// `retransmit_mult * ceil(log10(n + 1))` for a cluster of `n` live
/// nodes, so a message is repeated often enough to saturate the cluster
/// with high probability without gossiping forever.
#[derive(Debug)]
pub struct TransmitLimitedQueue {
    pending: Mutex<Vec<Pending>>,
    nodes: Arc<AtomicUsize>,
    retransmit_mult: AtomicUsize,
}

impl TransmitLimitedQueue {
    /// `nodes` is the live-member counter maintained by the cluster
    /// membership, shared so the queue always scales against the current
    /// cluster size.
    pub fn new(retransmit_mult: usize, nodes: Arc<AtomicUsize>) -> TransmitLimitedQueue {
        TransmitLimitedQueue {
            pending: Mutex::new(Vec::new()),
            nodes,
            retransmit_mult: AtomicUsize::new(retransmit_mult.max(1)),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.load(Ordering::Acquire).max(1)
    }

    /// Widens the retransmit multiplier; used after joining so small
    /// clusters with more seeds than the configured multiplier still
    /// propagate reliably. Never shrinks.
    pub fn widen_retransmit_mult(&self, mult: usize) {
        self.retransmit_mult.fetch_max(mult, Ordering::AcqRel);
    }

    fn retransmit_limit(&self) -> usize {
        let scale = ((self.num_nodes() + 1) as f64).log10().ceil() as usize;
        self.retransmit_mult.load(Ordering::Acquire) * scale.max(1)
    }

    /// Enqueues a broadcast, dropping any pending message it supersedes.
    pub fn queue(&self, broadcast: ActionBroadcast) {
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|p| !broadcast.invalidates(&p.broadcast));
        pending.push(Pending {
            broadcast,
            transmits: 0,
        });
    }

    /// Drains up to `limit` bytes of payloads, charging `overhead` bytes
    /// per message, least-transmitted first. Selected messages have their
    /// transmit count bumped; messages that reach the retransmit limit are
    /// retired.
    pub fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Bytes> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return Vec::new();
        }
        pending.sort_by_key(|p| p.transmits);

        let retransmit_limit = self.retransmit_limit();
        let mut used = 0usize;
        let mut out = Vec::new();
        for p in pending.iter_mut() {
            let cost = overhead + p.broadcast.payload().len();
            if used.saturating_add(cost) > limit {
                continue;
            }
            used += cost;
            p.transmits += 1;
            out.push(p.broadcast.payload().clone());
        }
        let before = pending.len();
        pending.retain(|p| p.transmits < retransmit_limit);
        if pending.len() < before {
            trace!(target: "gossip_queue", retired = before - pending.len(), "retired broadcasts");
        }
        out
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
