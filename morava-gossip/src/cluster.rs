//! Minimal membership substrate the replicated map plugs into.
//!
//! Peers gossip user broadcasts over UDP, probe each other for liveness,
//! and periodically exchange full state over TCP (push/pull
//! anti-entropy). The substrate knows nothing about the payloads it
//! carries; everything user-visible flows through the [`Delegate`]
//! callbacks.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::{GossipError, Result};

/// Practical payload budget for a gossip datagram.
const MAX_UDP_PAYLOAD: usize = 1400;
/// Envelope bytes reserved around the broadcast payload list.
const PACKET_RESERVE: usize = 64;
/// Per-payload framing cost inside a broadcast packet.
const BROADCAST_OVERHEAD: usize = 8;
/// Cap on advertised node metadata.
const MAX_NODE_META: usize = 512;
/// Upper bound on a push/pull frame; anything larger is rejected.
const MAX_SYNC_FRAME: usize = 32 * 1024 * 1024;
/// Overall deadline for one push/pull exchange.
const SYNC_TIMEOUT: Duration = Duration::from_secs(2);

/// Callbacks the substrate drives. Invoked from substrate tasks, so
/// implementations serialise their own state access and must not block.
pub trait Delegate: Send + Sync + 'static {
    /// Opaque per-node metadata advertised to peers, at most `limit` bytes.
    fn node_meta(&self, _limit: usize) -> Vec<u8> {
        Vec::new()
    }

    /// A user message arrived from a peer.
    fn notify_msg(&self, msg: &[u8]);

    /// Pending user broadcasts to send, within the byte budget.
    fn broadcasts(&self, overhead: usize, limit: usize) -> Vec<Bytes>;

    /// Full local state for push/pull synchronisation.
    fn local_state(&self, join: bool) -> Vec<u8>;

    /// Merge a peer's full state.
    fn merge_remote_state(&self, buf: &[u8], join: bool);
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Unique node name; defaults to the advertised address when empty.
    pub node_name: String,
    /// Address to bind UDP and TCP on. Port 0 picks an ephemeral port
    /// shared by both protocols.
    pub bind_addr: SocketAddr,
    /// Address peers should reach us at; defaults to the bound address.
    pub advertise_addr: Option<SocketAddr>,
    /// Seed addresses (`host:port`, DNS names allowed) contacted at join.
    pub seeds: Vec<String>,
    pub gossip_interval: Duration,
    /// Number of random peers each gossip tick fans out to.
    pub gossip_fanout: usize,
    pub probe_interval: Duration,
    /// A peer that misses a single ack within this window is declared
    /// dead and dropped from the member list; push/pull re-adds it if it
    /// was only slow.
    pub probe_timeout: Duration,
    /// Anti-entropy interval: full state exchange with one random peer.
    pub push_pull_interval: Duration,
    /// Base retransmit multiplier for the broadcast queue; widened to the
    /// seed count and the number of peers joined.
    pub retransmit_mult: usize,
}

impl Default for ClusterConfig {
    fn default() -> ClusterConfig {
        ClusterConfig {
            node_name: String::new(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7946)),
            advertise_addr: None,
            seeds: Vec::new(),
            gossip_interval: Duration::from_millis(200),
            gossip_fanout: 3,
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(500),
            push_pull_interval: Duration::from_secs(30),
            retransmit_mult: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub addr: SocketAddr,
    pub meta: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
enum Packet {
    Ping { seq: u64, from: NodeInfo },
    Ack { seq: u64 },
    Broadcasts { payloads: Vec<Vec<u8>> },
    Leave { node: NodeInfo },
}

#[derive(Debug, Serialize, Deserialize)]
struct SyncFrame {
    from: NodeInfo,
    members: Vec<NodeInfo>,
    state: Vec<u8>,
    join: bool,
}

struct ClusterInner {
    config: ClusterConfig,
    local: NodeInfo,
    delegate: Arc<dyn Delegate>,
    /// Live peers, keyed by advertised address. Excludes self.
    members: RwLock<HashMap<SocketAddr, NodeInfo>>,
    /// Live node count including self, shared with the broadcast queue.
    nodes: Arc<AtomicUsize>,
    socket: UdpSocket,
    acks: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    seq: AtomicU64,
    cancel: CancellationToken,
}

/// One gossip cluster node: background tasks plus the member list.
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("node", &self.inner.local.name)
            .field("addr", &self.inner.local.addr)
            .field("members", &self.num_members())
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// Binds sockets, spawns the substrate tasks and returns the running
    /// node. Seeds are not contacted here; call [`Cluster::join`].
    pub async fn start(
        config: ClusterConfig,
        delegate: Arc<dyn Delegate>,
        nodes: Arc<AtomicUsize>,
    ) -> Result<Cluster> {
        let (socket, listener) = bind_pair(config.bind_addr).await?;
        let local_addr = socket.local_addr()?;
        let advertise = config.advertise_addr.unwrap_or(local_addr);
        let name = if config.node_name.is_empty() {
            advertise.to_string()
        } else {
            config.node_name.clone()
        };
        let local = NodeInfo {
            name,
            addr: advertise,
            meta: delegate.node_meta(MAX_NODE_META),
        };
        nodes.store(1, Ordering::Release);

        let inner = Arc::new(ClusterInner {
            config,
            local,
            delegate,
            members: RwLock::new(HashMap::new()),
            nodes,
            socket,
            acks: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });
        inner.clone().spawn_udp_reader();
        inner.clone().spawn_acceptor(listener);
        inner.clone().spawn_gossip();
        inner.clone().spawn_probe();
        inner.clone().spawn_push_pull();

        info!(target: "cluster", node = %inner.local.name, addr = %advertise, "cluster node started");
        Ok(Cluster { inner })
    }

    /// Contacts the given seeds and push/pull-syncs with each reachable
    /// one. Returns the number of seeds contacted. Fails when seeds named
    /// actual peers and none was reachable; a list that only resolves to
    /// this node (the first node of a fleet seeding itself) is not an
    /// error.
    pub async fn join(&self, seeds: &[String]) -> Result<usize> {
        if seeds.is_empty() {
            return Ok(0);
        }
        let mut joined = 0;
        let mut saw_remote_candidate = false;
        for seed in seeds {
            let addrs = match lookup_host(seed.as_str()).await {
                Ok(addrs) => addrs.collect::<Vec<_>>(),
                Err(e) => {
                    warn!(target: "cluster", seed = %seed, error = %e, "seed resolution failed");
                    saw_remote_candidate = true;
                    continue;
                }
            };
            for addr in addrs {
                if addr == self.inner.local.addr {
                    continue;
                }
                saw_remote_candidate = true;
                match self.inner.sync_with(addr, true).await {
                    Ok(()) => {
                        joined += 1;
                        break;
                    }
                    Err(e) => {
                        warn!(target: "cluster", seed = %seed, peer = %addr, error = %e, "seed sync failed")
                    }
                }
            }
        }
        if joined == 0 && saw_remote_candidate {
            return Err(GossipError::JoinFailed);
        }
        info!(target: "cluster", node = %self.inner.local.name, joined, "joined cluster");
        Ok(joined)
    }

    /// Best-effort leave announcement to every known peer, bounded by
    /// `timeout`.
    pub async fn leave(&self, timeout: Duration) {
        let members: Vec<NodeInfo> = {
            let members = self.inner.members.read().unwrap();
            members.values().cloned().collect()
        };
        let packet = Packet::Leave {
            node: self.inner.local.clone(),
        };
        let notify = async {
            for member in &members {
                self.inner.send_packet(&packet, member.addr).await;
            }
        };
        if tokio::time::timeout(timeout, notify).await.is_err() {
            warn!(target: "cluster", "leave announcement timed out");
        }
    }

    /// Stops all substrate tasks. The node stays silent afterwards; peers
    /// notice through probe timeouts if it never announced a leave.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        info!(target: "cluster", node = %self.inner.local.name, "cluster node shut down");
    }

    /// Live node count, including this node.
    pub fn num_members(&self) -> usize {
        self.inner.nodes.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local.addr
    }

    pub fn local_name(&self) -> &str {
        &self.inner.local.name
    }

    pub fn members(&self) -> Vec<NodeInfo> {
        self.inner.members.read().unwrap().values().cloned().collect()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl ClusterInner {
    fn spawn_udp_reader(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    received = self.socket.recv_from(&mut buf) => {
                        match received {
                            Ok((n, src)) => self.handle_packet(&buf[..n], src).await,
                            Err(e) => {
                                if self.cancel.is_cancelled() {
                                    break;
                                }
                                warn!(target: "cluster", error = %e, "udp receive failed");
                            }
                        }
                    }
                }
            }
            trace!(target: "cluster", "udp reader stopped");
        });
    }

    async fn handle_packet(&self, raw: &[u8], src: SocketAddr) {
        let packet: Packet = match bincode::deserialize(raw) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(target: "cluster", peer = %src, error = %e, "dropping undecodable packet");
                return;
            }
        };
        match packet {
            Packet::Ping { seq, from } => {
                self.add_member(from);
                self.send_packet(&Packet::Ack { seq }, src).await;
            }
            Packet::Ack { seq } => {
                let waiter = self.acks.lock().unwrap().remove(&seq);
                if let Some(tx) = waiter {
                    let _ = tx.send(());
                }
            }
            Packet::Broadcasts { payloads } => {
                for payload in payloads {
                    self.delegate.notify_msg(&payload);
                }
            }
            Packet::Leave { node } => self.remove_member(node.addr),
        }
    }

    fn spawn_gossip(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.config.gossip_interval);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let payloads = self
                            .delegate
                            .broadcasts(BROADCAST_OVERHEAD, MAX_UDP_PAYLOAD - PACKET_RESERVE);
                        if payloads.is_empty() {
                            continue;
                        }
                        let targets = self.sample_members(self.config.gossip_fanout);
                        if targets.is_empty() {
                            continue;
                        }
                        let packet = Packet::Broadcasts {
                            payloads: payloads.iter().map(|p| p.to_vec()).collect(),
                        };
                        for target in targets {
                            self.send_packet(&packet, target.addr).await;
                        }
                    }
                }
            }
        });
    }

    fn spawn_probe(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.config.probe_interval);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let Some(target) = self.sample_members(1).into_iter().next() else {
                            continue;
                        };
                        self.probe(target).await;
                    }
                }
            }
        });
    }

    async fn probe(&self, target: NodeInfo) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.acks.lock().unwrap().insert(seq, tx);
        self.send_packet(
            &Packet::Ping {
                seq,
                from: self.local.clone(),
            },
            target.addr,
        )
        .await;
        match tokio::time::timeout(self.config.probe_timeout, rx).await {
            Ok(Ok(())) => trace!(target: "cluster", node = %target.name, "probe acked"),
            _ => {
                self.acks.lock().unwrap().remove(&seq);
                warn!(target: "cluster", node = %target.name, addr = %target.addr, "probe timed out, marking dead");
                self.remove_member(target.addr);
            }
        }
    }

    fn spawn_push_pull(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.config.push_pull_interval);
            // skip the immediate first tick; state was exchanged at join
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let Some(target) = self.sample_members(1).into_iter().next() else {
                            continue;
                        };
                        if let Err(e) = self.sync_with(target.addr, false).await {
                            warn!(target: "cluster", node = %target.name, error = %e, "anti-entropy sync failed");
                        }
                    }
                }
            }
        });
    }

    fn spawn_acceptor(self: Arc<Self>, listener: TcpListener) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(target: "cluster", error = %e, "tcp accept failed");
                                continue;
                            }
                        };
                        let inner = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = inner.handle_sync(stream).await {
                                debug!(target: "cluster", peer = %peer, error = %e, "sync handler failed");
                            }
                        });
                    }
                }
            }
        });
    }

    /// Server side of a push/pull exchange: absorb the peer's view first,
    /// then answer with the merged one, so a joining node gets its own
    /// entries echoed back already confirmed.
    async fn handle_sync(&self, mut stream: TcpStream) -> Result<()> {
        let frame = tokio::time::timeout(SYNC_TIMEOUT, read_frame(&mut stream))
            .await
            .map_err(sync_timeout)??;
        let join = frame.join;
        self.absorb(frame, join);
        let reply = self.sync_frame(join);
        tokio::time::timeout(SYNC_TIMEOUT, write_frame(&mut stream, &reply))
            .await
            .map_err(sync_timeout)??;
        Ok(())
    }

    /// Client side of a push/pull exchange with `addr`.
    async fn sync_with(&self, addr: SocketAddr, join: bool) -> Result<()> {
        tokio::time::timeout(SYNC_TIMEOUT, self.sync_with_inner(addr, join))
            .await
            .map_err(sync_timeout)?
    }

    async fn sync_with_inner(&self, addr: SocketAddr, join: bool) -> Result<()> {
        let mut stream = TcpStream::connect(addr).await?;
        let frame = self.sync_frame(join);
        write_frame(&mut stream, &frame).await?;
        let reply = read_frame(&mut stream).await?;
        self.absorb(reply, join);
        Ok(())
    }

    fn sync_frame(&self, join: bool) -> SyncFrame {
        let mut members: Vec<NodeInfo> = {
            let members = self.members.read().unwrap();
            members.values().cloned().collect()
        };
        members.push(self.local.clone());
        SyncFrame {
            from: self.local.clone(),
            members,
            state: self.delegate.local_state(join),
            join,
        }
    }

    fn absorb(&self, frame: SyncFrame, join: bool) {
        self.add_member(frame.from);
        for node in frame.members {
            self.add_member(node);
        }
        self.delegate.merge_remote_state(&frame.state, join);
    }

    fn add_member(&self, node: NodeInfo) {
        if node.addr == self.local.addr {
            return;
        }
        let mut members = self.members.write().unwrap();
        if members.insert(node.addr, node.clone()).is_none() {
            self.nodes.store(members.len() + 1, Ordering::Release);
            debug!(target: "cluster", node = %node.name, addr = %node.addr, "member joined");
        }
    }

    fn remove_member(&self, addr: SocketAddr) {
        let mut members = self.members.write().unwrap();
        if let Some(node) = members.remove(&addr) {
            self.nodes.store(members.len() + 1, Ordering::Release);
            info!(target: "cluster", node = %node.name, addr = %addr, "member removed");
        }
    }

    fn sample_members(&self, n: usize) -> Vec<NodeInfo> {
        let members = self.members.read().unwrap();
        let mut rng = rand::rng();
        members.values().cloned().choose_multiple(&mut rng, n)
    }

    async fn send_packet(&self, packet: &Packet, to: SocketAddr) {
        match bincode::serialize(packet) {
            Ok(body) => {
                if let Err(e) = self.socket.send_to(&body, to).await {
                    trace!(target: "cluster", peer = %to, error = %e, "udp send failed");
                }
            }
            Err(e) => warn!(target: "cluster", error = %e, "packet encode failed"),
        }
    }
}

fn sync_timeout(_: tokio::time::error::Elapsed) -> GossipError {
    GossipError::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        "push/pull sync timed out",
    ))
}

/// Binds UDP and TCP on the same port. With an explicit port both binds
/// must succeed; with port 0 the ephemeral port chosen for UDP is retried
/// until TCP can share it.
async fn bind_pair(bind: SocketAddr) -> Result<(UdpSocket, TcpListener)> {
    if bind.port() != 0 {
        let socket = UdpSocket::bind(bind).await?;
        let listener = TcpListener::bind(bind).await?;
        return Ok((socket, listener));
    }
    for _ in 0..16 {
        let socket = UdpSocket::bind(bind).await?;
        let port = socket.local_addr()?.port();
        match TcpListener::bind(SocketAddr::new(bind.ip(), port)).await {
            Ok(listener) => return Ok((socket, listener)),
            Err(_) => continue,
        }
    }
    Err(GossipError::Io(io::Error::new(
        io::ErrorKind::AddrInUse,
        "no port with both udp and tcp free",
    )))
}

async fn write_frame(stream: &mut TcpStream, frame: &SyncFrame) -> Result<()> {
    let body = bincode::serialize(frame)?;
    stream.write_all(&(body.len() as u32).to_le_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<SyncFrame> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_SYNC_FRAME {
        return Err(GossipError::MalformedFrame("oversized sync frame"));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}
