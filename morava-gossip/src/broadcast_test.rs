#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;

    use crate::action::Action;
    use crate::broadcast::{ActionBroadcast, TransmitLimitedQueue};

    fn set_broadcast(key: &str, value: &'static [u8]) -> ActionBroadcast {
        ActionBroadcast::new(&Action::set(key, Bytes::from_static(value), 1))
    }

    fn queue_with_nodes(mult: usize, n: usize) -> (TransmitLimitedQueue, Arc<AtomicUsize>) {
        let nodes = Arc::new(AtomicUsize::new(n));
        (TransmitLimitedQueue::new(mult, nodes.clone()), nodes)
    }

    #[test]
    fn same_key_and_type_supersedes() {
        let old = set_broadcast("x", b"1");
        let new = set_broadcast("x", b"2");
        assert!(new.invalidates(&old));
    }

    #[test]
    fn different_key_or_type_does_not_supersede() {
        let set_x = set_broadcast("x", b"1");
        let set_y = set_broadcast("y", b"1");
        let delete_x = ActionBroadcast::new(&Action::delete("x", 2));
        assert!(!set_y.invalidates(&set_x));
        assert!(!delete_x.invalidates(&set_x));
    }

    #[test]
    fn queueing_drops_superseded_pending() {
        let (queue, _) = queue_with_nodes(3, 1);
        queue.queue(set_broadcast("x", b"1"));
        queue.queue(set_broadcast("y", b"1"));
        queue.queue(set_broadcast("x", b"2"));
        assert_eq!(queue.len(), 2);

        let payloads = queue.get_broadcasts(0, usize::MAX);
        assert_eq!(payloads.len(), 2);
        let decoded: Vec<Action> = payloads
            .iter()
            .map(|p| Action::decode(p).unwrap())
            .collect();
        let x = decoded.iter().find(|a| a.key == "x").unwrap();
        assert_eq!(x.value.as_ref(), b"2");
    }

    #[test]
    fn respects_byte_budget() {
        let (queue, _) = queue_with_nodes(3, 1);
        queue.queue(set_broadcast("a", b"0123456789"));
        queue.queue(set_broadcast("b", b"0123456789"));
        let one_message = 9 + 1 + 1 + 10; // header + key + NUL + value
        let payloads = queue.get_broadcasts(0, one_message);
        assert_eq!(payloads.len(), 1);
        // the message that did not fit is still pending
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn retires_after_retransmit_limit() {
        // 1 node: limit = 1 * ceil(log10(2)) = 1 transmit
        let (queue, _) = queue_with_nodes(1, 1);
        queue.queue(set_broadcast("x", b"1"));
        assert_eq!(queue.get_broadcasts(0, usize::MAX).len(), 1);
        assert!(queue.is_empty());
        assert!(queue.get_broadcasts(0, usize::MAX).is_empty());
    }

    #[test]
    fn limit_scales_with_cluster_size() {
        // 12 nodes: limit = 1 * ceil(log10(13)) = 2 transmits
        let (queue, nodes) = queue_with_nodes(1, 12);
        queue.queue(set_broadcast("x", b"1"));
        assert_eq!(queue.get_broadcasts(0, usize::MAX).len(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get_broadcasts(0, usize::MAX).len(), 1);
        assert!(queue.is_empty());

        // widening the multiplier raises the limit for new broadcasts
        nodes.store(1, Ordering::Release);
        queue.widen_retransmit_mult(3);
        queue.queue(set_broadcast("x", b"2"));
        for _ in 0..3 {
            assert_eq!(queue.get_broadcasts(0, usize::MAX).len(), 1);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn least_transmitted_first() {
        let (queue, _) = queue_with_nodes(10, 100);
        queue.queue(set_broadcast("old", b"1"));
        let budget = 9 + 3 + 1 + 1; // exactly one "old"-sized message
        assert_eq!(queue.get_broadcasts(0, budget).len(), 1);
        queue.queue(set_broadcast("new", b"1"));

        let payloads = queue.get_broadcasts(0, budget);
        let action = Action::decode(&payloads[0]).unwrap();
        assert_eq!(action.key, "new");
    }
}
