use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, error, trace};

use morava_core::epoch_millis;

use crate::action::{Action, ActionType};
use crate::broadcast::{ActionBroadcast, TransmitLimitedQueue};
use crate::cluster::Delegate;
use crate::entry::Entry;
use crate::errors::Result;

/// How often an unconfirmed local write re-checks whether the cluster has
/// shrunk to a single node (in which case it confirms itself).
const SINGLE_NODE_POLL: Duration = Duration::from_millis(5);

/// One replicated cell. Immutable once installed except for its
/// timestamp, which may be pulled forward when peers echo the same value
/// with a newer time; a differing value replaces the whole cell.
#[derive(Debug)]
struct Cell {
    value: Bytes,
    time_ms: i64,
    /// One-shot confirmation latch: resolved when any peer echoes this
    /// `(key, value)` back, when a state merge matches it, or when the
    /// node is alone in the cluster. Cells learned from peers are
    /// resolved at construction.
    confirmed: watch::Sender<bool>,
}

impl Cell {
    fn new(value: Bytes, time_ms: i64, confirmed: bool) -> Cell {
        let (tx, _) = watch::channel(confirmed);
        Cell {
            value,
            time_ms,
            confirmed: tx,
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.confirmed.subscribe()
    }

    /// Resolves the latch; returns `true` when this call performed the
    /// transition, so double resolution stays a silent no-op.
    fn resolve_once(&self) -> bool {
        !self.confirmed.send_replace(true)
    }
}

enum SetStep {
    /// An identical value is already stored; ride its confirmation.
    Wait(watch::Receiver<bool>),
    /// A fresh cell was installed at this timestamp.
    Installed(watch::Receiver<bool>, i64),
}

/// The replicated last-writer-wins map behind the gossip KV.
///
/// All map access is serialised under one reader/writer lock; the
/// substrate invokes [`Delegate`] callbacks from its own tasks.
/// Confirmation waits always happen outside the lock, since the echo that
/// resolves them arrives through [`Delegate::notify_msg`], which takes the
/// same lock.
pub struct KvDelegate {
    queue: Arc<TransmitLimitedQueue>,
    map: RwLock<HashMap<String, Cell>>,
}

impl KvDelegate {
    pub fn new(queue: Arc<TransmitLimitedQueue>) -> KvDelegate {
        KvDelegate {
            queue,
            map: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn queue(&self) -> &TransmitLimitedQueue {
        &self.queue
    }

    /// Looks up `key` and waits for the cell's confirmation before
    /// returning, so readers never observe values no peer has
    /// acknowledged. Returns `None` when the key is absent.
    pub(crate) async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        loop {
            let (value, mut confirmed) = {
                let map = self.map.read().unwrap();
                match map.get(key) {
                    None => return Ok(None),
                    Some(cell) => (cell.value.clone(), cell.subscribe()),
                }
            };
            let result = confirmed.wait_for(|resolved| *resolved).await;
            match result {
                Ok(_) => return Ok(Some(value)),
                // the cell was replaced while we waited; re-read
                Err(_) => continue,
            }
        }
    }

    /// Stores `key = value` locally, broadcasts the mutation and waits
    /// until a peer confirms it (or until the node observes it is alone).
    pub(crate) async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        loop {
            let step = {
                let mut map = self.map.write().unwrap();
                match map.get(key) {
                    Some(cell) if cell.value == value => SetStep::Wait(cell.subscribe()),
                    _ => {
                        let time_ms = epoch_millis();
                        let cell = Cell::new(value.clone(), time_ms, false);
                        let confirmed = cell.subscribe();
                        map.insert(key.to_string(), cell);
                        SetStep::Installed(confirmed, time_ms)
                    }
                }
            };
            match step {
                SetStep::Wait(mut confirmed) => {
                    match confirmed.wait_for(|resolved| *resolved).await {
                        Ok(_) => return Ok(()),
                        // replaced under us; try again
                        Err(_) => continue,
                    }
                }
                SetStep::Installed(confirmed, time_ms) => {
                    let action = Action::set(key, value, time_ms);
                    self.queue.queue(ActionBroadcast::new(&action));
                    debug!(target: "gossip_kv", key, time_ms, "queued set");
                    self.wait_confirmed(key, time_ms, confirmed).await;
                    return Ok(());
                }
            }
        }
    }

    /// Removes `key` locally and broadcasts the deletion. Fire-and-forget:
    /// deletions are not confirmed.
    pub(crate) async fn delete(&self, key: &str) -> Result<()> {
        {
            let mut map = self.map.write().unwrap();
            if map.remove(key).is_none() {
                return Ok(());
            }
        }
        let action = Action::delete(key, epoch_millis());
        self.queue.queue(ActionBroadcast::new(&action));
        debug!(target: "gossip_kv", key, "queued delete");
        Ok(())
    }

    async fn wait_confirmed(&self, key: &str, time_ms: i64, mut confirmed: watch::Receiver<bool>) {
        if self.queue.num_nodes() == 1 {
            self.confirm_local(key, time_ms);
        }
        let mut tick = tokio::time::interval(SINGLE_NODE_POLL);
        loop {
            if *confirmed.borrow_and_update() {
                return;
            }
            tokio::select! {
                _ = tick.tick() => {
                    if self.queue.num_nodes() == 1 {
                        self.confirm_local(key, time_ms);
                    }
                }
                changed = confirmed.changed() => {
                    if changed.is_err() {
                        // superseded by a newer write before any peer echoed it
                        debug!(target: "gossip_kv", key, "write superseded before confirmation");
                        return;
                    }
                }
            }
        }
    }

    fn confirm_local(&self, key: &str, time_ms: i64) {
        let map = self.map.read().unwrap();
        if let Some(cell) = map.get(key) {
            if cell.time_ms == time_ms && cell.resolve_once() {
                trace!(target: "gossip_kv", key, "single node: confirmed");
            }
        }
    }
}

impl Delegate for KvDelegate {
    fn notify_msg(&self, msg: &[u8]) {
        let action = match Action::decode(msg) {
            Ok(action) => action,
            Err(e) => {
                // framing violation from the substrate; never poisons the map
                error!(target: "gossip_kv", error = %e, "dropping undecodable gossip message");
                return;
            }
        };
        if action.typ == ActionType::Unknown {
            return;
        }
        {
            let mut map = self.map.write().unwrap();
            if let Some(cell) = map.get_mut(&action.key) {
                if action.time_ms < cell.time_ms {
                    trace!(target: "gossip_kv", key = %action.key, "skipping stale message");
                    return;
                }
                if cell.value == action.value {
                    // idempotent echo: adopt the newer timestamp, resolve
                    cell.time_ms = action.time_ms;
                    if cell.resolve_once() {
                        debug!(target: "gossip_kv", key = %action.key, "confirmed");
                    }
                    return;
                }
                debug!(target: "gossip_kv", key = %action.key, typ = %action.typ, "overriding value");
            }
            match action.typ {
                ActionType::Set => {
                    map.insert(
                        action.key.clone(),
                        Cell::new(action.value.clone(), action.time_ms, true),
                    );
                }
                ActionType::Delete => {
                    map.remove(&action.key);
                }
                ActionType::Unknown => {}
            }
        }
        // keep the mutation spreading
        self.queue
            .queue(ActionBroadcast::from_raw(Bytes::copy_from_slice(msg), &action));
    }

    fn broadcasts(&self, overhead: usize, limit: usize) -> Vec<Bytes> {
        self.queue.get_broadcasts(overhead, limit)
    }

    fn local_state(&self, _join: bool) -> Vec<u8> {
        let map = self.map.read().unwrap();
        let mut buf = Vec::new();
        for (key, cell) in map.iter() {
            let entry = Entry {
                key: key.clone(),
                time_ms: cell.time_ms,
                value: cell.value.clone(),
            };
            buf.extend_from_slice(&entry.encode());
        }
        buf
    }

    fn merge_remote_state(&self, buf: &[u8], join: bool) {
        let entries = match Entry::decode_all(buf) {
            Ok(entries) => entries,
            Err(e) => {
                error!(target: "gossip_kv", error = %e, "aborting undecodable state merge");
                return;
            }
        };
        trace!(target: "gossip_kv", entries = entries.len(), join, "merging remote state");
        let mut map = self.map.write().unwrap();
        for entry in entries {
            let Entry {
                key,
                time_ms,
                value,
            } = entry;
            if let Some(cell) = map.get_mut(&key) {
                if time_ms < cell.time_ms {
                    continue;
                }
                if cell.value == value {
                    cell.time_ms = time_ms;
                    if cell.resolve_once() {
                        debug!(target: "gossip_kv", key = %key, "confirmed by state merge");
                    }
                    continue;
                }
            }
            // remote is authoritative; nothing to wait for
            map.insert(key, Cell::new(value, time_ms, true));
        }
    }
}
