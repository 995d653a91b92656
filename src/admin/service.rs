//! The admin control surface.
//!
//! Register, list and delete routes; add, list and delete rate-limit rules.
//! Every mutation goes through the routing table's write path and the
//! persistence collaborator. Creates are applied to the table first (it
//! assigns ids and detects conflicts) and rolled back if persisting fails;
//! deletes are persisted first so a failing store leaves the table intact.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::load_balancer::BackendManager;
use crate::reconcile::converge_backends;
use crate::routing::{
    RateLimitRule, RateLimitRuleSpec, Route, RouteSpec, RouteStore, RoutingError, RoutingTable,
    StoreError,
};
use crate::security::RateLimiterRegistry;

/// Default page size for route listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Upper bound on the page size.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type AdminResult<T> = Result<T, AdminError>;

/// One page of routes.
#[derive(Debug, Clone, Serialize)]
pub struct RoutePage {
    pub routes: Vec<Route>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

/// Control-plane operations over one gateway's routing state.
#[derive(Debug, Clone)]
pub struct AdminService {
    table: Arc<RoutingTable>,
    backends: Arc<BackendManager>,
    limiters: Arc<RateLimiterRegistry>,
    store: Arc<dyn RouteStore>,
}

impl AdminService {
    pub fn new(
        table: Arc<RoutingTable>,
        backends: Arc<BackendManager>,
        limiters: Arc<RateLimiterRegistry>,
        store: Arc<dyn RouteStore>,
    ) -> Self {
        Self {
            table,
            backends,
            limiters,
            store,
        }
    }

    /// Register a route. A second enabled route on the same path and method is rejected.
    pub async fn register_route(&self, spec: RouteSpec) -> AdminResult<Arc<Route>> {
        let route = self.table.insert_route(spec)?;
        if let Err(e) = self.store.save_route(Route::clone(&route)).await {
            let _ = self.table.remove_route(route.id);
            tracing::error!(route_id = %route.id, error = %e, "Failed to persist route, registration rolled back");
            return Err(e.into());
        }
        converge_backends(&self.table, &self.backends, &route.service);
        tracing::info!(
            route_id = %route.id,
            method = %route.method,
            path = %route.path,
            service = %route.service,
            "Route registered"
        );
        Ok(route)
    }

    /// List routes in registration order. `page` counts from 1.
    pub fn list_routes(&self, page: usize, page_size: usize) -> RoutePage {
        let page = page.max(1);
        let page_size = match page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let all = self.table.routes();
        let total = all.len();
        let routes = all
            .iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .map(|r| Route::clone(r))
            .collect();
        RoutePage {
            routes,
            page,
            page_size,
            total,
        }
    }

    pub fn get_route(&self, id: Uuid) -> Option<Arc<Route>> {
        self.table.get(id)
    }

    pub async fn delete_route(&self, id: Uuid) -> AdminResult<Arc<Route>> {
        if self.table.get(id).is_none() {
            return Err(RoutingError::RouteNotFound(id).into());
        }
        self.store.delete_route(id).await?;
        let route = self.table.remove_route(id)?;
        converge_backends(&self.table, &self.backends, &route.service);
        tracing::info!(route_id = %id, service = %route.service, "Route deleted");
        Ok(route)
    }

    /// Add a rate-limit rule. Names are unique.
    pub async fn add_rule(&self, spec: RateLimitRuleSpec) -> AdminResult<Arc<RateLimitRule>> {
        let rule = self.table.add_rule(spec)?;
        if let Err(e) = self.store.save_rule(RateLimitRule::clone(&rule)).await {
            let _ = self.table.remove_rule(&rule.name);
            tracing::error!(rule = %rule.name, error = %e, "Failed to persist rule, rolled back");
            return Err(e.into());
        }
        tracing::info!(rule = %rule.name, path = %rule.path, limit = rule.limit, "Rate-limit rule added");
        Ok(rule)
    }

    pub fn list_rules(&self) -> Vec<Arc<RateLimitRule>> {
        self.table.rules()
    }

    pub async fn delete_rule(&self, name: &str) -> AdminResult<Arc<RateLimitRule>> {
        if self.table.get_rule(name).is_none() {
            return Err(RoutingError::RuleNotFound(name.to_string()).into());
        }
        self.store.delete_rule(name).await?;
        let rule = self.table.remove_rule(name)?;
        self.limiters.remove(name);
        tracing::info!(rule = %name, "Rate-limit rule deleted");
        Ok(rule)
    }

    /// Warm the table from the store. Records the table rejects are skipped.
    /// Returns the number of routes and rules loaded.
    pub async fn load_from_store(&self) -> AdminResult<(usize, usize)> {
        let mut routes = self.store.list_routes().await?;
        routes.sort_by_key(|r| r.seq);
        let mut loaded_routes = 0;
        for route in &routes {
            match self.table.restore_route(route) {
                Ok(restored) => {
                    converge_backends(&self.table, &self.backends, &restored.service);
                    loaded_routes += 1;
                }
                Err(e) => tracing::warn!(route_id = %route.id, error = %e, "Stored route skipped"),
            }
        }

        let mut loaded_rules = 0;
        for rule in self.store.list_rules().await? {
            match self.table.restore_rule(&rule) {
                Ok(_) => loaded_rules += 1,
                Err(e) => tracing::warn!(rule = %rule.name, error = %e, "Stored rule skipped"),
            }
        }

        tracing::info!(routes = loaded_routes, rules = loaded_rules, "Routing state loaded from store");
        Ok((loaded_routes, loaded_rules))
    }
}
