//! Consistent hash ring.
//!
//! Every physical node owns `virtual_nodes` positions on a 64-bit ring. A key
//! belongs to the first position clockwise from its hash. Adding or removing
//! a node only moves the keys that land on that node's positions.
//!
//! Positions come from SHA-256, so assignments are stable across processes
//! and releases. Readers load an immutable ring snapshot; topology changes
//! build a new one and swap it in.

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Ring {
    /// (position, node) sorted by position, then node id.
    points: Vec<(u64, Arc<str>)>,
    nodes: BTreeSet<Arc<str>>,
}

/// Consistent hash ring of node identifiers.
#[derive(Debug)]
pub struct HashRing {
    virtual_nodes: usize,
    ring: ArcSwap<Ring>,
    write_lock: Mutex<()>,
}

/// Position of `data` on the ring.
fn ring_hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

impl HashRing {
    /// Create an empty ring. `virtual_nodes` is at least 1.
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            ring: ArcSwap::from_pointee(Ring::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Add a node. Returns false if it was already present.
    pub fn add(&self, node_id: &str) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.ring.load();
        if current.nodes.contains(node_id) {
            return false;
        }

        let node: Arc<str> = Arc::from(node_id);
        let mut points = Vec::with_capacity(current.points.len() + self.virtual_nodes);
        points.extend(current.points.iter().cloned());
        for i in 0..self.virtual_nodes {
            let pos = ring_hash(format!("{}#{}", node_id, i).as_bytes());
            points.push((pos, node.clone()));
        }
        points.sort_unstable();

        let mut nodes = current.nodes.clone();
        nodes.insert(node);
        self.ring.store(Arc::new(Ring { points, nodes }));
        true
    }

    /// Remove a node. Returns false if it was not present.
    pub fn remove(&self, node_id: &str) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.ring.load();
        if !current.nodes.contains(node_id) {
            return false;
        }

        let points = current
            .points
            .iter()
            .filter(|(_, n)| &**n != node_id)
            .cloned()
            .collect();
        let mut nodes = current.nodes.clone();
        nodes.remove(node_id);
        self.ring.store(Arc::new(Ring { points, nodes }));
        true
    }

    /// The node owning `key`, or None when the ring is empty.
    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        let ring = self.ring.load();
        if ring.points.is_empty() {
            return None;
        }
        let h = ring_hash(key.as_bytes());
        let idx = ring.points.partition_point(|(pos, _)| *pos < h);
        let (_, node) = &ring.points[idx % ring.points.len()];
        Some(node.clone())
    }

    /// Physical node ids, sorted.
    pub fn nodes(&self) -> Vec<String> {
        self.ring.load().nodes.iter().map(|n| n.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.ring.load().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
