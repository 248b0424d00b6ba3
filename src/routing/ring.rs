//! Consistent-hash ring with virtual nodes.
//!
//! Each node is placed at `replicas` positions on a 32-bit circle. A key is
//! owned by the node whose position is the first one at or clockwise of the
//! key's hash. Adding or removing one node only remaps the keys adjacent to
//! its positions.
//!
//! The ring also keeps a rolling request count per node; `rebalance` shifts
//! virtual-node counts away from overloaded nodes, which nudges placement
//! for skewed workloads without changing node identity.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pluggable 32-bit hash over raw bytes.
pub type HashFn = Arc<dyn Fn(&[u8]) -> u32 + Send + Sync>;

pub const DEFAULT_REPLICAS: usize = 50;

#[derive(Clone)]
pub struct RingOptions {
    /// Virtual nodes placed per real node.
    pub replicas: usize,
    /// Floor for load-aware adjustment.
    pub min_replicas: usize,
    /// Ceiling for load-aware adjustment.
    pub max_replicas: usize,
    /// Hash function; a stable non-cryptographic default is used when unset.
    pub hash: Option<HashFn>,
}

impl Default for RingOptions {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICAS,
            min_replicas: 10,
            max_replicas: 100,
            hash: None,
        }
    }
}

fn default_hash(data: &[u8]) -> u32 {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    hasher.finish() as u32
}

pub struct HashRing {
    replicas: usize,
    min_replicas: usize,
    max_replicas: usize,
    hash: HashFn,
    /// Sorted virtual-node positions.
    keys: Vec<u32>,
    /// Position -> owning node.
    ring: HashMap<u32, String>,
    /// Node -> current virtual-node count.
    replica_counts: HashMap<String, usize>,
    /// Rolling request counts since the last rebalance.
    loads: HashMap<String, AtomicU64>,
}

impl HashRing {
    pub fn new(opts: RingOptions) -> Self {
        Self {
            replicas: opts.replicas.max(1),
            min_replicas: opts.min_replicas.max(1),
            max_replicas: opts.max_replicas.max(opts.replicas),
            hash: opts.hash.unwrap_or_else(|| Arc::new(default_hash)),
            keys: Vec::new(),
            ring: HashMap::new(),
            replica_counts: HashMap::new(),
            loads: HashMap::new(),
        }
    }

    /// Adds a node at its virtual positions. Re-adding is a no-op.
    pub fn add(&mut self, node: &str) {
        if self.replica_counts.contains_key(node) {
            return;
        }
        self.place(node, self.replicas);
        self.loads.insert(node.to_string(), AtomicU64::new(0));
    }

    /// Removes every virtual position of a node.
    pub fn remove(&mut self, node: &str) {
        self.displace(node);
        self.loads.remove(node);
    }

    /// Owner of `key`: the first virtual position at or clockwise of the
    /// key's hash, wrapping past the top of the circle.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let target = (self.hash)(key.as_bytes());
        let pos = self.keys.partition_point(|&position| position < target);
        let pos = if pos == self.keys.len() { 0 } else { pos };
        let node = self.ring.get(&self.keys[pos])?;
        if let Some(load) = self.loads.get(node) {
            load.fetch_add(1, Ordering::Relaxed);
        }
        Some(node)
    }

    /// Number of virtual positions on the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.replica_counts.contains_key(node)
    }

    pub fn node_count(&self) -> usize {
        self.replica_counts.len()
    }

    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.replica_counts.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    pub fn replicas_for(&self, node: &str) -> Option<usize> {
        self.replica_counts.get(node).copied()
    }

    /// Load-aware adjustment: nodes above 1.25x the mean request count lose
    /// one virtual node, nodes below 0.75x gain one, both within bounds.
    /// Counts reset afterwards.
    pub fn rebalance(&mut self) {
        if self.replica_counts.is_empty() {
            return;
        }
        let total: u64 = self
            .loads
            .values()
            .map(|load| load.load(Ordering::Relaxed))
            .sum();
        if total == 0 {
            return;
        }
        let mean = total as f64 / self.replica_counts.len() as f64;

        let mut changes = Vec::new();
        for (node, count) in &self.replica_counts {
            let load = self
                .loads
                .get(node)
                .map_or(0, |load| load.load(Ordering::Relaxed)) as f64;
            if load > mean * 1.25 && *count > self.min_replicas {
                changes.push((node.clone(), count - 1));
            } else if load < mean * 0.75 && *count < self.max_replicas {
                changes.push((node.clone(), count + 1));
            }
        }

        for (node, count) in changes {
            tracing::debug!("adjusting {} to {} replicas", node, count);
            self.displace(&node);
            self.place(&node, count);
        }
        for load in self.loads.values() {
            load.store(0, Ordering::Relaxed);
        }
    }

    fn place(&mut self, node: &str, count: usize) {
        self.replica_counts.insert(node.to_string(), count);
        for i in 0..count {
            let position = (self.hash)(format!("{}{}", i, node).as_bytes());
            self.ring.insert(position, node.to_string());
            self.keys.push(position);
        }
        self.keys.sort_unstable();
    }

    fn displace(&mut self, node: &str) {
        let Some(count) = self.replica_counts.remove(node) else {
            return;
        };
        for i in 0..count {
            let position = (self.hash)(format!("{}{}", i, node).as_bytes());
            // Only drop positions still owned by this node; virtual-node
            // hash collisions are possible, if vanishingly rare.
            if self.ring.get(&position).map(String::as_str) == Some(node) {
                self.ring.remove(&position);
            }
            if let Some(at) = self.keys.iter().position(|&key| key == position) {
                self.keys.remove(at);
            }
        }
    }
}
