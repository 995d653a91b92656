//! Latency-aware (EWMA) load balancing strategy.

use std::sync::{Arc, PoisonError, RwLock};

use crate::load_balancer::backend::Backend;
use crate::observability::metrics;

/// Picks the tracked node with the lowest EWMA latency.
///
/// Nodes without samples report zero and are preferred, so a newly added node
/// is tried immediately instead of starving behind warm ones.
#[derive(Debug)]
pub struct EwmaBalancer {
    alpha: f64,
    /// Nodes in first-seen order; ties go to the earliest.
    nodes: RwLock<Vec<Arc<Backend>>>,
}

impl EwmaBalancer {
    /// Create a balancer. `alpha` is clamped into (0, 1].
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 { alpha.min(1.0) } else { 1.0 };
        Self {
            alpha,
            nodes: RwLock::new(Vec::new()),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Track a node. Re-adding a known id keeps its latency history.
    pub fn add_node(&self, backend: Backend) -> Arc<Backend> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = nodes.iter().find(|n| n.id == backend.id) {
            return existing.clone();
        }
        let backend = Arc::new(backend);
        nodes.push(backend.clone());
        backend
    }

    /// Stop tracking a node.
    pub fn remove_node(&self, id: &str) -> Option<Arc<Backend>> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let idx = nodes.iter().position(|n| n.id == id)?;
        Some(nodes.remove(idx))
    }

    /// The node with the lowest current estimate.
    pub fn pick(&self) -> Option<Arc<Backend>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        // min_by keeps the first of equal elements
        nodes
            .iter()
            .min_by(|a, b| a.latency_ms().total_cmp(&b.latency_ms()))
            .cloned()
    }

    /// Fold a latency sample into a node's estimate. Unknown ids are ignored.
    pub fn report_latency(&self, id: &str, duration_ms: f64) -> Option<f64> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let node = nodes.iter().find(|n| n.id == id)?;
        let estimate = node.observe(duration_ms, self.alpha);
        metrics::record_backend_latency(&node.id, estimate);
        Some(estimate)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Backend>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.iter().find(|n| n.id == id).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<Backend>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
