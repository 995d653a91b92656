//! The in-memory routing table.
//!
//! # Responsibilities
//! - Hold declared routes, keyed by id and by external identifier
//! - Hold rate-limit rules, keyed by unique name
//! - Resolve (method, path) to exactly one enabled route
//!
//! # Design Decisions
//! - Readers load an immutable snapshot through `ArcSwap`; they never wait on writers
//! - Writers serialize on a mutex, build the next snapshot off to the side and swap it in
//! - Admin mutations and reconciliation share these entry points, so there is one write path

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::observability::metrics;
use crate::routing::matcher::PathPattern;
use crate::routing::types::{RateLimitRule, RateLimitRuleSpec, Route, RouteSpec, RoutingError};

#[derive(Debug, Clone)]
struct RouteEntry {
    route: Arc<Route>,
    pattern: PathPattern,
}

#[derive(Debug, Clone)]
struct RuleEntry {
    rule: Arc<RateLimitRule>,
    pattern: PathPattern,
}

/// An immutable view of the table.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    routes: HashMap<Uuid, RouteEntry>,
    by_external: HashMap<String, Uuid>,
    rules: HashMap<String, RuleEntry>,
    /// Enabled routes, most specific first.
    candidates: Vec<RouteEntry>,
    next_seq: u64,
}

impl Snapshot {
    fn rebuild_candidates(&mut self) {
        let mut candidates: Vec<RouteEntry> = self
            .routes
            .values()
            .filter(|e| e.route.enabled)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.pattern
                .specificity()
                .cmp(&a.pattern.specificity())
                .then(a.route.seq.cmp(&b.route.seq))
        });
        self.candidates = candidates;
    }

    /// Reject a second enabled route on the same (pattern, method).
    fn check_conflict(
        &self,
        spec: &RouteSpec,
        pattern: &PathPattern,
        exclude: Option<Uuid>,
    ) -> Result<(), RoutingError> {
        if !spec.enabled {
            return Ok(());
        }
        let clash = self.routes.values().find(|e| {
            Some(e.route.id) != exclude
                && e.route.enabled
                && e.route.method == spec.method
                && e.pattern == *pattern
        });
        match clash {
            Some(e) => Err(RoutingError::Conflict {
                method: spec.method.clone(),
                path: spec.path.clone(),
                existing: e.route.id,
            }),
            None => Ok(()),
        }
    }

    fn insert(&mut self, id: Uuid, spec: RouteSpec, pattern: PathPattern) -> Arc<Route> {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(ext) = &spec.external_id {
            self.by_external.insert(ext.clone(), id);
        }
        let route = Arc::new(Route::from_spec(id, seq, spec));
        self.routes.insert(
            id,
            RouteEntry {
                route: route.clone(),
                pattern,
            },
        );
        route
    }

    fn remove(&mut self, id: Uuid) -> Option<Arc<Route>> {
        let entry = self.routes.remove(&id)?;
        if let Some(ext) = &entry.route.external_id {
            if self.by_external.get(ext) == Some(&id) {
                self.by_external.remove(ext);
            }
        }
        Some(entry.route)
    }
}

/// Result of an idempotent upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(Arc<Route>),
    Updated(Arc<Route>),
    /// The stored route already had the desired fields.
    Unchanged(Arc<Route>),
}

impl UpsertOutcome {
    pub fn route(&self) -> &Arc<Route> {
        match self {
            UpsertOutcome::Created(r) | UpsertOutcome::Updated(r) | UpsertOutcome::Unchanged(r) => r,
        }
    }
}

/// The aggregate root for declared routes and rate-limit rules.
#[derive(Debug, Default)]
pub struct RoutingTable {
    current: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against a private copy of the snapshot and publish it on success.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<T, RoutingError>,
    ) -> Result<T, RoutingError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Snapshot::clone(&self.current.load());
        let out = f(&mut next)?;
        next.rebuild_candidates();
        metrics::record_route_count(next.routes.len());
        self.current.store(Arc::new(next));
        Ok(out)
    }

    /// Register a new route.
    pub fn insert_route(&self, spec: RouteSpec) -> Result<Arc<Route>, RoutingError> {
        self.insert_with_id(Uuid::new_v4(), spec)
    }

    /// Re-register a persisted route under its original id.
    pub fn restore_route(&self, route: &Route) -> Result<Arc<Route>, RoutingError> {
        if self.get(route.id).is_some() {
            return Err(RoutingError::Invalid {
                field: "id",
                reason: format!("route {} already present", route.id),
            });
        }
        self.insert_with_id(route.id, route.to_spec())
    }

    fn insert_with_id(&self, id: Uuid, spec: RouteSpec) -> Result<Arc<Route>, RoutingError> {
        let (spec, pattern) = spec.validate()?;
        self.mutate(|snap| {
            if let Some(ext) = &spec.external_id {
                if snap.by_external.contains_key(ext) {
                    return Err(RoutingError::DuplicateExternalId(ext.clone()));
                }
            }
            snap.check_conflict(&spec, &pattern, None)?;
            Ok(snap.insert(id, spec, pattern))
        })
    }

    /// Insert or update the route bound to this external identifier.
    ///
    /// Replaying the same spec converges on the same state.
    pub fn upsert_by_external_id(&self, spec: RouteSpec) -> Result<UpsertOutcome, RoutingError> {
        let (spec, pattern) = spec.validate()?;
        let ext = spec.external_id.clone().ok_or(RoutingError::Invalid {
            field: "external_id",
            reason: "required for declarative upserts".into(),
        })?;

        // Fast path: nothing to publish when the stored route already matches.
        if let Some(route) = self.get_by_external_id(&ext) {
            if Route::from_spec(route.id, route.seq, spec.clone()) == *route {
                return Ok(UpsertOutcome::Unchanged(route));
            }
        }

        self.mutate(|snap| match snap.by_external.get(&ext).copied() {
            Some(id) => {
                snap.check_conflict(&spec, &pattern, Some(id))?;
                let entry = snap
                    .routes
                    .get_mut(&id)
                    .ok_or(RoutingError::RouteNotFound(id))?;
                let mut route = Route::clone(&entry.route);
                route.apply(spec);
                if route == *entry.route {
                    return Ok(UpsertOutcome::Unchanged(entry.route.clone()));
                }
                entry.route = Arc::new(route);
                entry.pattern = pattern;
                Ok(UpsertOutcome::Updated(entry.route.clone()))
            }
            None => {
                snap.check_conflict(&spec, &pattern, None)?;
                Ok(UpsertOutcome::Created(snap.insert(Uuid::new_v4(), spec, pattern)))
            }
        })
    }

    /// Delete a route by id.
    pub fn remove_route(&self, id: Uuid) -> Result<Arc<Route>, RoutingError> {
        self.mutate(|snap| snap.remove(id).ok_or(RoutingError::RouteNotFound(id)))
    }

    /// Delete the route bound to an external identifier. Absence is not an error.
    pub fn remove_by_external_id(&self, external_id: &str) -> Option<Arc<Route>> {
        self.get_by_external_id(external_id)?;
        self.mutate(|snap| {
            Ok(snap
                .by_external
                .get(external_id)
                .copied()
                .and_then(|id| snap.remove(id)))
        })
        .ok()
        .flatten()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Route>> {
        self.current.load().routes.get(&id).map(|e| e.route.clone())
    }

    pub fn get_by_external_id(&self, external_id: &str) -> Option<Arc<Route>> {
        let snap = self.current.load();
        let id = snap.by_external.get(external_id)?;
        snap.routes.get(id).map(|e| e.route.clone())
    }

    /// All routes in registration order.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let snap = self.current.load();
        let mut routes: Vec<_> = snap.routes.values().map(|e| e.route.clone()).collect();
        routes.sort_by_key(|r| r.seq);
        routes
    }

    /// Routes targeting a logical service.
    pub fn routes_for_service(&self, service: &str) -> Vec<Arc<Route>> {
        self.routes()
            .into_iter()
            .filter(|r| r.service == service)
            .collect()
    }

    pub fn route_count(&self) -> usize {
        self.current.load().routes.len()
    }

    /// Resolve a request to the most specific enabled route.
    pub fn resolve(&self, method: &str, path: &str) -> Option<Arc<Route>> {
        self.current
            .load()
            .candidates
            .iter()
            .find(|e| e.route.accepts_method(method) && e.pattern.matches(path))
            .map(|e| e.route.clone())
    }

    /// Add a rate-limit rule. Names are unique.
    pub fn add_rule(&self, spec: RateLimitRuleSpec) -> Result<Arc<RateLimitRule>, RoutingError> {
        self.add_rule_with_id(Uuid::new_v4(), spec)
    }

    /// Re-register a persisted rule under its original id.
    pub fn restore_rule(&self, rule: &RateLimitRule) -> Result<Arc<RateLimitRule>, RoutingError> {
        self.add_rule_with_id(rule.id, rule.to_spec())
    }

    fn add_rule_with_id(&self, id: Uuid, spec: RateLimitRuleSpec) -> Result<Arc<RateLimitRule>, RoutingError> {
        let (spec, pattern) = spec.validate()?;
        self.mutate(|snap| {
            if snap.rules.contains_key(&spec.name) {
                return Err(RoutingError::DuplicateRule(spec.name.clone()));
            }
            let rule = Arc::new(RateLimitRule::from_spec(id, spec));
            snap.rules.insert(
                rule.name.clone(),
                RuleEntry {
                    rule: rule.clone(),
                    pattern,
                },
            );
            Ok(rule)
        })
    }

    pub fn remove_rule(&self, name: &str) -> Result<Arc<RateLimitRule>, RoutingError> {
        self.mutate(|snap| {
            snap.rules
                .remove(name)
                .map(|e| e.rule)
                .ok_or_else(|| RoutingError::RuleNotFound(name.to_string()))
        })
    }

    pub fn get_rule(&self, name: &str) -> Option<Arc<RateLimitRule>> {
        self.current.load().rules.get(name).map(|e| e.rule.clone())
    }

    /// All rules, sorted by name.
    pub fn rules(&self) -> Vec<Arc<RateLimitRule>> {
        let snap = self.current.load();
        let mut rules: Vec<_> = snap.rules.values().map(|e| e.rule.clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    /// Enabled rules protecting (method, path).
    pub fn matching_rules(&self, method: &str, path: &str) -> Vec<Arc<RateLimitRule>> {
        let snap = self.current.load();
        let mut rules: Vec<_> = snap
            .rules
            .values()
            .filter(|e| e.rule.enabled && e.rule.accepts_method(method) && e.pattern.matches(path))
            .map(|e| e.rule.clone())
            .collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::KeyStrategy;

    fn spec(path: &str, method: &str, service: &str) -> RouteSpec {
        RouteSpec::new(path, method, service, vec!["127.0.0.1:9000".into()])
    }

    fn declared(ext: &str, path: &str) -> RouteSpec {
        RouteSpec {
            external_id: Some(ext.into()),
            source: Some("test".into()),
            ..spec(path, "GET", "svc")
        }
    }

    #[test]
    fn test_resolve_most_specific() {
        let table = RoutingTable::new();
        let catch = table.insert_route(spec("/orders/*", "*", "fallback")).unwrap();
        let param = table.insert_route(spec("/orders/{id}", "GET", "orders")).unwrap();
        let exact = table.insert_route(spec("/orders/recent", "GET", "recent")).unwrap();

        assert_eq!(table.resolve("GET", "/orders/recent").unwrap().id, exact.id);
        assert_eq!(table.resolve("GET", "/orders/42").unwrap().id, param.id);
        assert_eq!(table.resolve("POST", "/orders/42").unwrap().id, catch.id);
        assert!(table.resolve("GET", "/catalog").is_none());
    }

    #[test]
    fn test_disabled_routes_do_not_resolve() {
        let table = RoutingTable::new();
        table
            .insert_route(RouteSpec { enabled: false, ..spec("/a", "GET", "svc") })
            .unwrap();
        assert!(table.resolve("GET", "/a").is_none());

        // A disabled route does not block an enabled one on the same key
        let live = table.insert_route(spec("/a", "GET", "svc")).unwrap();
        assert_eq!(table.resolve("GET", "/a").unwrap().id, live.id);
    }

    #[test]
    fn test_conflicting_route_rejected() {
        let table = RoutingTable::new();
        table.insert_route(spec("/orders/{id}", "GET", "a")).unwrap();
        let err = table.insert_route(spec("/orders/:order", "get", "b")).unwrap_err();
        assert!(matches!(err, RoutingError::Conflict { .. }));
        // Different method is fine
        table.insert_route(spec("/orders/{id}", "DELETE", "b")).unwrap();
        assert_eq!(table.route_count(), 2);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let table = RoutingTable::new();
        let first = table.upsert_by_external_id(declared("X", "/x")).unwrap();
        assert!(matches!(first, UpsertOutcome::Created(_)));

        let again = table.upsert_by_external_id(declared("X", "/x")).unwrap();
        assert!(matches!(again, UpsertOutcome::Unchanged(_)));
        assert_eq!(again.route().id, first.route().id);

        let changed = table.upsert_by_external_id(declared("X", "/x2")).unwrap();
        assert!(matches!(changed, UpsertOutcome::Updated(_)));
        assert_eq!(changed.route().id, first.route().id);

        let with_ext: Vec<_> = table
            .routes()
            .into_iter()
            .filter(|r| r.external_id.as_deref() == Some("X"))
            .collect();
        assert_eq!(with_ext.len(), 1);
        assert_eq!(with_ext[0].path, "/x2");
        assert!(table.resolve("GET", "/x").is_none());
        assert!(table.resolve("GET", "/x2").is_some());
    }

    #[test]
    fn test_upsert_requires_external_id() {
        let table = RoutingTable::new();
        let err = table.upsert_by_external_id(spec("/a", "GET", "svc")).unwrap_err();
        assert!(matches!(err, RoutingError::Invalid { field: "external_id", .. }));
    }

    #[test]
    fn test_remove_by_external_id_absent_is_noop() {
        let table = RoutingTable::new();
        assert!(table.remove_by_external_id("missing").is_none());

        table.upsert_by_external_id(declared("X", "/x")).unwrap();
        assert!(table.remove_by_external_id("X").is_some());
        assert!(table.remove_by_external_id("X").is_none());
        assert_eq!(table.route_count(), 0);
    }

    #[test]
    fn test_duplicate_external_id_on_insert() {
        let table = RoutingTable::new();
        table.insert_route(declared("X", "/x")).unwrap();
        let err = table.insert_route(declared("X", "/y")).unwrap_err();
        assert_eq!(err, RoutingError::DuplicateExternalId("X".into()));
    }

    #[test]
    fn test_reader_snapshot_survives_write() {
        let table = RoutingTable::new();
        let route = table.insert_route(spec("/a", "GET", "svc")).unwrap();
        let before = table.routes();
        table.remove_route(route.id).unwrap();
        assert_eq!(before.len(), 1);
        assert!(table.get(route.id).is_none());
        assert_eq!(table.remove_route(route.id).unwrap_err(), RoutingError::RouteNotFound(route.id));
    }

    #[test]
    fn test_rules() {
        let table = RoutingTable::new();
        let rule = RateLimitRuleSpec {
            name: "login".into(),
            path: "/login".into(),
            method: "POST".into(),
            limit: 5,
            window_secs: 60,
            enabled: true,
            key_strategy: KeyStrategy::Ip,
        };
        table.add_rule(rule.clone()).unwrap();
        assert_eq!(
            table.add_rule(rule.clone()).unwrap_err(),
            RoutingError::DuplicateRule("login".into())
        );
        table
            .add_rule(RateLimitRuleSpec { name: "off".into(), enabled: false, ..rule })
            .unwrap();

        let hits = table.matching_rules("POST", "/login");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "login");
        assert!(table.matching_rules("GET", "/login").is_empty());

        table.remove_rule("login").unwrap();
        assert!(table.matching_rules("POST", "/login").is_empty());
        assert_eq!(table.rules().len(), 1);
    }
}
