//! Backend pool management.
//!
//! # Responsibilities
//! - Group backends by logical service name
//! - Keep each service's hash ring and EWMA balancer in step
//! - Select a node per request by strategy (latency or hash)

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::schema::Strategy;
use crate::load_balancer::{backend::Backend, ewma::EwmaBalancer, hash_ring::HashRing};

/// Nodes of one logical service.
#[derive(Debug)]
pub struct ServiceBackends {
    ring: HashRing,
    balancer: EwmaBalancer,
}

impl ServiceBackends {
    fn new(virtual_nodes: usize, alpha: f64) -> Self {
        Self {
            ring: HashRing::new(virtual_nodes),
            balancer: EwmaBalancer::new(alpha),
        }
    }

    // The balancer knows a node before the ring hands it out, and after the
    // ring stops handing it out.
    fn add(&self, addr: &str) -> bool {
        self.balancer.add_node(Backend::from_addr(addr));
        self.ring.add(addr)
    }

    fn remove(&self, addr: &str) -> bool {
        let removed = self.ring.remove(addr);
        self.balancer.remove_node(addr);
        removed
    }

    /// Select a node. Hash selection falls back to latency when no key is given.
    pub fn select(&self, strategy: Strategy, key: Option<&str>) -> Option<Arc<Backend>> {
        match (strategy, key) {
            (Strategy::Hash, Some(key)) => {
                let node = self.ring.get(key)?;
                self.balancer.get(&node)
            }
            _ => self.balancer.pick(),
        }
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn balancer(&self) -> &EwmaBalancer {
        &self.balancer
    }
}

/// Manages backend groups per logical service.
#[derive(Debug)]
pub struct BackendManager {
    virtual_nodes: usize,
    alpha: f64,
    services: RwLock<HashMap<String, Arc<ServiceBackends>>>,
}

impl BackendManager {
    pub fn new(virtual_nodes: usize, alpha: f64) -> Self {
        Self {
            virtual_nodes,
            alpha,
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Get the group for `service`, creating it on first use.
    fn group(&self, service: &str) -> Arc<ServiceBackends> {
        {
            let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(group) = services.get(service) {
                return group.clone();
            }
        }
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        services
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(ServiceBackends::new(self.virtual_nodes, self.alpha)))
            .clone()
    }

    pub fn get_group(&self, service: &str) -> Option<Arc<ServiceBackends>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .cloned()
    }

    /// Add nodes to a service without touching existing ones.
    pub fn add_backends<'a>(&self, service: &str, addrs: impl IntoIterator<Item = &'a str>) {
        let group = self.group(service);
        for addr in addrs {
            if group.add(addr) {
                tracing::info!(service = %service, node = %addr, "Backend added");
            }
        }
    }

    /// Make a service's node set exactly `addrs`. An empty set drops the service.
    pub fn sync_service(&self, service: &str, addrs: &BTreeSet<String>) {
        if addrs.is_empty() {
            let removed = self
                .services
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(service);
            if removed.is_some() {
                tracing::info!(service = %service, "Service has no declared backends, dropped");
            }
            return;
        }

        let group = self.group(service);
        for stale in group.ring.nodes().into_iter().filter(|n| !addrs.contains(n)) {
            if group.remove(&stale) {
                tracing::info!(service = %service, node = %stale, "Backend removed");
            }
        }
        self.add_backends(service, addrs.iter().map(String::as_str));
    }

    /// Select a node for `service`.
    pub fn select(&self, service: &str, strategy: Strategy, key: Option<&str>) -> Option<Arc<Backend>> {
        let group = self.get_group(service);
        match group.and_then(|g| g.select(strategy, key)) {
            Some(backend) => Some(backend),
            None => {
                tracing::debug!(service = %service, "No backend available for service");
                None
            }
        }
    }

    /// Feed a latency sample back to the service's balancer.
    pub fn report_latency(&self, service: &str, node_id: &str, duration_ms: f64) {
        if let Some(group) = self.get_group(service) {
            group.balancer.report_latency(node_id, duration_ms);
        }
    }

    /// Service names with at least one node.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
