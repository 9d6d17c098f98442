use std::sync::Arc;
use std::time::Duration;

use morava_gossip::{ClusterConfig, GossipKv};

/// Aggressive gossip timings so multi-node scenarios converge quickly on
/// loopback. Anti-entropy stays slow by default; tests that rely on it
/// shorten it explicitly.
pub fn test_config(name: &str, seeds: Vec<String>) -> ClusterConfig {
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

pub async fn spawn_node(name: &str, seeds: Vec<String>) -> Arc<GossipKv> {
    spawn_node_with(name, seeds, |_| {}).await
}

pub async fn spawn_node_with<F>(name: &str, seeds: Vec<String>, tweak: F) -> Arc<GossipKv>
where
    F: FnOnce(&mut ClusterConfig),
{
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut config = test_config(name, seeds);
    tweak(&mut config);
    Arc::new(
        GossipKv::create(config)
            .await
            .expect("node must start on an ephemeral port"),
    )
}

pub fn seed_of(kv: &GossipKv) -> String {
    kv.cluster().local_addr().to_string()
}

/// Polls `check` every 50 ms until it returns true or `deadline` elapses.
pub async fn eventually<F>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        if check() {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
