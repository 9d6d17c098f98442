//! End-to-end election over the gossip lock backend: two real cluster
//! nodes on loopback, one elector each.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use morava_election::{Callbacks, ElectionConfig, ElectionState, LeaderElector};
use morava_gossip::{ClusterConfig, GossipKv, GossipLock, KeyValue};

fn cluster_config(name: &str, seeds: Vec<String>) -> ClusterConfig {
    ClusterConfig {
        node_name: name.to_string(),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        advertise_addr: None,
        seeds,
        gossip_interval: Duration::from_millis(50),
        gossip_fanout: 3,
        probe_interval: Duration::from_millis(500),
        probe_timeout: Duration::from_millis(250),
        push_pull_interval: Duration::from_secs(60),
        retransmit_mult: 4,
    }
}

fn election_config(lock: Arc<GossipLock>) -> ElectionConfig {
    ElectionConfig {
        lock,
        lease_duration: Duration::from_secs(3),
        renew_deadline: Duration::from_secs(2),
        retry_period: Duration::from_millis(500),
        release_on_cancel: false,
        name: "takeover".to_string(),
        callbacks: Callbacks::logging(),
    }
}

async fn wait_for_state(rx: &mut watch::Receiver<ElectionState>, want: ElectionState) {
    while *rx.borrow_and_update() != want {
        rx.changed().await.expect("elector exited unexpectedly");
    }
}

#[tokio::test]
async fn candidate_takes_over_when_the_gossip_leader_dies() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let kv_a = Arc::new(GossipKv::create(cluster_config("a", vec![])).await.unwrap());
    let seed = kv_a.cluster().local_addr().to_string();
    let kv_b = Arc::new(GossipKv::create(cluster_config("b", vec![seed])).await.unwrap());

    let lock_a = Arc::new(GossipLock::new(kv_a.clone(), "takeover", "a"));
    let lock_b = Arc::new(GossipLock::new(kv_b.clone(), "takeover", "b"));

    let elector_a = LeaderElector::new(election_config(lock_a)).unwrap();
    let mut state_a = elector_a.watch_state();
    let cancel_a = CancellationToken::new();
    let handle_a = tokio::spawn(elector_a.run(cancel_a.clone()));
    timeout(
        Duration::from_secs(10),
        wait_for_state(&mut state_a, ElectionState::Leading),
    )
    .await
    .expect("first candidate must acquire the gossip lock");

    let elector_b = LeaderElector::new(election_config(lock_b)).unwrap();
    let mut state_b = elector_b.watch_state();
    let mut leader_b = elector_b.watch_leader();
    let handle_b = tokio::spawn(elector_b.run(CancellationToken::new()));

    // b must observe a's leadership first
    timeout(Duration::from_secs(10), async {
        loop {
            if leader_b.borrow_and_update().as_deref() == Some("a") {
                break;
            }
            leader_b.changed().await.unwrap();
        }
    })
    .await
    .expect("follower must observe the current leader");

    // kill a: elector stops renewing and its cluster node goes away
    cancel_a.cancel();
    handle_a.await.unwrap();
    kv_a.cluster().shutdown();

    timeout(
        Duration::from_secs(15),
        wait_for_state(&mut state_b, ElectionState::Leading),
    )
    .await
    .expect("second candidate must take over after the lease expires");

    handle_b.abort();
    kv_b.close().await.unwrap();
}
