#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use crate::action::Action;
    use crate::broadcast::TransmitLimitedQueue;
    use crate::cluster::Delegate;
    use crate::delegate::KvDelegate;

    fn delegate_with_nodes(n: usize) -> Arc<KvDelegate> {
        let nodes = Arc::new(AtomicUsize::new(n));
        let queue = Arc::new(TransmitLimitedQueue::new(3, nodes));
        Arc::new(KvDelegate::new(queue))
    }

    fn value(v: &'static [u8]) -> Bytes {
        Bytes::from_static(v)
    }

    #[tokio::test]
    async fn single_node_set_and_get_round_trip() {
        let delegate = delegate_with_nodes(1);
        tokio::time::timeout(Duration::from_secs(1), delegate.set("x", value(b"1")))
            .await
            .expect("single-node set must confirm itself within one poll tick")
            .unwrap();
        let got = delegate.get("x").await.unwrap();
        assert_eq!(got, Some(value(b"1")));
    }

    #[tokio::test]
    async fn set_blocks_until_peer_echo() {
        let delegate = delegate_with_nodes(2);
        let task = {
            let delegate = delegate.clone();
            tokio::spawn(async move { delegate.set("x", value(b"1")).await })
        };

        // no peer has echoed yet
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        // the substrate would relay our own broadcast to a peer, which
        // echoes it back verbatim
        let payloads = delegate.broadcasts(0, usize::MAX);
        assert_eq!(payloads.len(), 1);
        delegate.notify_msg(&payloads[0]);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("echo must confirm the write")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn get_waits_for_confirmation() {
        let delegate = delegate_with_nodes(2);
        let set_task = {
            let delegate = delegate.clone();
            tokio::spawn(async move { delegate.set("x", value(b"1")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let get_task = {
            let delegate = delegate.clone();
            tokio::spawn(async move { delegate.get("x").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!get_task.is_finished(), "get must not return unconfirmed values");

        let payloads = delegate.broadcasts(0, usize::MAX);
        delegate.notify_msg(&payloads[0]);

        let got = tokio::time::timeout(Duration::from_secs(1), get_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(value(b"1")));
        set_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn absent_key_returns_none_without_waiting() {
        let delegate = delegate_with_nodes(2);
        assert_eq!(delegate.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lww_replay_converges_under_any_permutation() {
        let actions = [
            Action::set("x", value(b"1"), 100),
            Action::delete("x", 200),
            Action::set("x", value(b"2"), 300),
        ];
        let permutations: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in permutations {
            let delegate = delegate_with_nodes(1);
            for i in order {
                delegate.notify_msg(&actions[i].encode());
            }
            let got = delegate.get("x").await.unwrap();
            assert_eq!(got, Some(value(b"2")), "order {order:?}");
        }
    }

    #[tokio::test]
    async fn stale_message_is_dropped() {
        let delegate = delegate_with_nodes(1);
        delegate.notify_msg(&Action::set("x", value(b"new"), 200).encode());
        delegate.notify_msg(&Action::set("x", value(b"old"), 100).encode());
        assert_eq!(delegate.get("x").await.unwrap(), Some(value(b"new")));
    }

    #[tokio::test]
    async fn repeated_echo_is_idempotent() {
        let delegate = delegate_with_nodes(2);
        let task = {
            let delegate = delegate.clone();
            tokio::spawn(async move { delegate.set("x", value(b"1")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let payloads = delegate.broadcasts(0, usize::MAX);
        delegate.notify_msg(&payloads[0]);
        delegate.notify_msg(&payloads[0]);
        delegate.notify_msg(&payloads[0]);
        task.await.unwrap().unwrap();
        assert_eq!(delegate.get("x").await.unwrap(), Some(value(b"1")));
    }

    #[tokio::test]
    async fn remote_learn_is_confirmed_at_construction() {
        let delegate = delegate_with_nodes(2);
        delegate.notify_msg(&Action::set("x", value(b"1"), 100).encode());
        // a value learned from a peer must be readable immediately
        let got = tokio::time::timeout(Duration::from_millis(100), delegate.get("x"))
            .await
            .expect("remote learns are pre-confirmed")
            .unwrap();
        assert_eq!(got, Some(value(b"1")));
    }

    #[tokio::test]
    async fn state_merge_confirms_matching_local_write() {
        let delegate = delegate_with_nodes(2);
        let task = {
            let delegate = delegate.clone();
            tokio::spawn(async move { delegate.set("x", value(b"1")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // anti-entropy delivers the same value with a peer timestamp
        let state = {
            let peer = delegate_with_nodes(1);
            peer.notify_msg(&Action::set("x", value(b"1"), i64::MAX / 2).encode());
            peer.local_state(false)
        };
        delegate.merge_remote_state(&state, false);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("state merge must confirm the write")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn local_state_round_trips_into_fresh_peer() {
        let source = delegate_with_nodes(1);
        source.set("a", value(b"1")).await.unwrap();
        source.set("b", value(b"2")).await.unwrap();

        let target = delegate_with_nodes(1);
        target.merge_remote_state(&source.local_state(true), true);

        assert_eq!(target.get("a").await.unwrap(), Some(value(b"1")));
        assert_eq!(target.get("b").await.unwrap(), Some(value(b"2")));
    }

    #[tokio::test]
    async fn delete_removes_and_broadcasts() {
        let delegate = delegate_with_nodes(1);
        delegate.set("x", value(b"1")).await.unwrap();
        delegate.broadcasts(0, usize::MAX); // drain the set broadcast

        delegate.delete("x").await.unwrap();
        assert_eq!(delegate.get("x").await.unwrap(), None);

        let payloads = delegate.broadcasts(0, usize::MAX);
        let actions: Vec<Action> = payloads.iter().map(|p| Action::decode(p).unwrap()).collect();
        assert!(actions
            .iter()
            .any(|a| a.key == "x" && a.typ == crate::action::ActionType::Delete));
    }

    #[tokio::test]
    async fn delete_of_absent_key_is_a_noop() {
        let delegate = delegate_with_nodes(1);
        delegate.delete("missing").await.unwrap();
        assert!(delegate.broadcasts(0, usize::MAX).is_empty());
    }

    #[tokio::test]
    async fn newer_local_write_supersedes_pending_broadcast() {
        let delegate = delegate_with_nodes(1);
        delegate.set("x", value(b"1")).await.unwrap();
        delegate.set("x", value(b"2")).await.unwrap();

        let payloads = delegate.broadcasts(0, usize::MAX);
        let sets: Vec<Action> = payloads
            .iter()
            .map(|p| Action::decode(p).unwrap())
            .filter(|a| a.key == "x")
            .collect();
        assert_eq!(sets.len(), 1, "older pending set must be superseded");
        assert_eq!(sets[0].value, value(b"2"));
    }
}
