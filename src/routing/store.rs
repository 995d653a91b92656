//! Persistence collaborator for route and rule records.
//!
//! The routing table is the authoritative copy at request time; a store only
//! has to survive restarts. Any backend (relational, document, in-memory) can
//! implement [`RouteStore`] without touching dispatch.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use uuid::Uuid;

use crate::routing::types::{RateLimitRule, Route};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Save/Get/List/Delete for routes and rate-limit rules.
pub trait RouteStore: Send + Sync + std::fmt::Debug {
    fn save_route(&self, route: Route) -> BoxFuture<'_, StoreResult<()>>;
    fn get_route(&self, id: Uuid) -> BoxFuture<'_, StoreResult<Option<Route>>>;
    fn list_routes(&self) -> BoxFuture<'_, StoreResult<Vec<Route>>>;
    fn delete_route(&self, id: Uuid) -> BoxFuture<'_, StoreResult<bool>>;

    fn save_rule(&self, rule: RateLimitRule) -> BoxFuture<'_, StoreResult<()>>;
    fn get_rule(&self, name: &str) -> BoxFuture<'_, StoreResult<Option<RateLimitRule>>>;
    fn list_rules(&self) -> BoxFuture<'_, StoreResult<Vec<RateLimitRule>>>;
    fn delete_rule(&self, name: &str) -> BoxFuture<'_, StoreResult<bool>>;
}

/// A process-local store, used when no external store is configured.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    routes: RwLock<HashMap<Uuid, Route>>,
    rules: RwLock<HashMap<String, RateLimitRule>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RouteStore for InMemoryStore {
    fn save_route(&self, route: Route) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.routes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(route.id, route);
            Ok(())
        })
    }

    fn get_route(&self, id: Uuid) -> BoxFuture<'_, StoreResult<Option<Route>>> {
        Box::pin(async move {
            Ok(self
                .routes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&id)
                .cloned())
        })
    }

    fn list_routes(&self) -> BoxFuture<'_, StoreResult<Vec<Route>>> {
        Box::pin(async move {
            let mut routes: Vec<Route> = self
                .routes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            routes.sort_by_key(|r| r.seq);
            Ok(routes)
        })
    }

    fn delete_route(&self, id: Uuid) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            Ok(self
                .routes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id)
                .is_some())
        })
    }

    fn save_rule(&self, rule: RateLimitRule) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.rules
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(rule.name.clone(), rule);
            Ok(())
        })
    }

    fn get_rule(&self, name: &str) -> BoxFuture<'_, StoreResult<Option<RateLimitRule>>> {
        let name = name.to_string();
        Box::pin(async move {
            Ok(self
                .rules
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&name)
                .cloned())
        })
    }

    fn list_rules(&self) -> BoxFuture<'_, StoreResult<Vec<RateLimitRule>>> {
        Box::pin(async move {
            let mut rules: Vec<RateLimitRule> = self
                .rules
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            rules.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(rules)
        })
    }

    fn delete_rule(&self, name: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let name = name.to_string();
        Box::pin(async move {
            Ok(self
                .rules
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&name)
                .is_some())
        })
    }
}
