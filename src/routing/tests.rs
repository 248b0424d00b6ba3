#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::routing::{HashFn, HashRing, RingOptions};

    fn ring_with(nodes: &[&str]) -> HashRing {
        let mut ring = HashRing::new(RingOptions::default());
        for node in nodes {
            ring.add(node);
        }
        ring
    }

    #[test]
    fn get_on_empty_ring_returns_none() {
        let ring = HashRing::new(RingOptions::default());
        assert!(ring.get("key").is_none());
    }

    #[test]
    fn get_is_deterministic() {
        let ring = ring_with(&["127.0.0.1:8001", "127.0.0.1:8002", "127.0.0.1:8003"]);
        let first = ring.get("user-42").map(str::to_string);
        for _ in 0..100 {
            assert_eq!(ring.get("user-42").map(str::to_string), first);
        }
    }

    #[test]
    fn positions_match_replica_counts() {
        let ring = ring_with(&["a", "b"]);
        let total: usize = ["a", "b"]
            .iter()
            .map(|node| ring.replicas_for(node).unwrap())
            .sum();
        assert_eq!(ring.len(), total, "sorted vector length must equal the replica sum");
        assert_eq!(ring.node_count(), 2);
    }

    #[test]
    fn keys_spread_over_all_nodes() {
        let ring = ring_with(&["n1", "n2", "n3"]);
        let mut seen: HashMap<String, usize> = HashMap::new();
        for i in 0..1000 {
            let owner = ring.get(&format!("key-{}", i)).unwrap().to_string();
            *seen.entry(owner).or_insert(0) += 1;
        }
        assert_eq!(seen.len(), 3, "all nodes should own some keys");
    }

    #[test]
    fn adding_a_node_remaps_a_minority_of_keys() {
        let mut ring = ring_with(&["n1", "n2", "n3"]);
        let before: Vec<String> = (0..1000)
            .map(|i| ring.get(&format!("key-{}", i)).unwrap().to_string())
            .collect();

        ring.add("n4");

        let moved = (0..1000)
            .filter(|i| ring.get(&format!("key-{}", i)).unwrap() != before[*i as usize])
            .count();
        assert!(moved > 0, "the new node must take over some keys");
        assert!(
            moved < 500,
            "a single added node moved {} of 1000 keys; expected roughly 1/4",
            moved
        );
    }

    #[test]
    fn removing_a_node_clears_its_positions() {
        let mut ring = ring_with(&["n1", "n2"]);
        ring.remove("n1");

        assert!(!ring.contains("n1"));
        assert_eq!(ring.node_count(), 1);
        for i in 0..100 {
            assert_eq!(ring.get(&format!("key-{}", i)), Some("n2"));
        }

        ring.remove("n2");
        assert!(ring.is_empty());
        assert!(ring.get("key").is_none());
    }

    #[test]
    fn wraps_past_the_top_of_the_circle() {
        // Pin every hash: both nodes sit at one position each, and the key
        // hashes beyond the highest position.
        let hash: HashFn = Arc::new(|data: &[u8]| match data {
            b"0alpha" => 100,
            b"0beta" => 200,
            _ => 250,
        });
        let mut ring = HashRing::new(RingOptions {
            replicas: 1,
            min_replicas: 1,
            hash: Some(hash),
            ..RingOptions::default()
        });
        ring.add("alpha");
        ring.add("beta");

        assert_eq!(ring.get("zz"), Some("alpha"), "past the end wraps to the first position");
    }

    #[test]
    fn rebalance_shifts_replicas_toward_idle_nodes() {
        // Force every key onto beta so the load skew is total.
        let hash: HashFn = Arc::new(|data: &[u8]| {
            let text = std::str::from_utf8(data).unwrap_or_default();
            if text.ends_with("alpha") {
                100
            } else if text.ends_with("beta") {
                1_000
            } else {
                500
            }
        });
        let mut ring = HashRing::new(RingOptions {
            replicas: 20,
            min_replicas: 5,
            max_replicas: 40,
            hash: Some(hash),
        });
        ring.add("alpha");
        ring.add("beta");

        for i in 0..100 {
            assert_eq!(ring.get(&format!("key-{}", i)), Some("beta"));
        }

        ring.rebalance();

        assert_eq!(ring.replicas_for("beta"), Some(19), "overloaded node loses a replica");
        assert_eq!(ring.replicas_for("alpha"), Some(21), "idle node gains a replica");
    }

    #[test]
    fn rebalance_without_traffic_is_a_no_op() {
        let mut ring = ring_with(&["a", "b"]);
        ring.rebalance();
        assert_eq!(ring.replicas_for("a"), ring.replicas_for("b"));
    }
}
