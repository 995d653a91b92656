//! The gateway aggregate.
//!
//! # Responsibilities
//! - Own every shared registry for one gateway instance
//! - Resolve a request to a route and a backend node
//! - Run the dispatch path: limit, guard, select, proxy, feed back latency

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{GatewayConfig, Strategy};
use crate::load_balancer::{Backend, BackendManager};
use crate::observability::metrics;
use crate::proxy::{CallMetadata, ConnectionPool, Connector, HttpConnectorFactory, ProxyRequest, ProxyResponse};
use crate::reconcile::converge_backends;
use crate::resilience::{BreakerSettings, CallError, CallOutcome, CircuitBreakerRegistry, Deadline};
use crate::routing::{Route, RoutingError, RoutingTable};
use crate::security::{CallerIdentity, KeyStrategy, RateLimiter, RateLimiterRegistry};

use super::error::{DispatchError, DispatchResult};

/// Scope label of the default per-caller limiter.
pub const GLOBAL_LIMIT_SCOPE: &str = "global";

/// A request entering the dispatch path.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub caller_ip: IpAddr,
    pub identity: CallerIdentity,
    /// Explicit key for hash routing; the caller key is used when absent.
    pub shard_key: Option<String>,
    pub request_id: Option<String>,
    pub request: ProxyRequest,
}

impl DispatchRequest {
    pub fn new(caller_ip: IpAddr, request: ProxyRequest) -> Self {
        Self {
            caller_ip,
            identity: CallerIdentity::anonymous(),
            shard_key: None,
            request_id: None,
            request,
        }
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        let pq = &self.request.path_and_query;
        pq.split_once('?').map_or(pq.as_str(), |(path, _)| path)
    }
}

/// A resolved (route, node) pair.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub route: Arc<Route>,
    pub backend: Arc<Backend>,
}

/// One gateway instance and all of its shared state.
#[derive(Debug)]
pub struct Gateway {
    table: Arc<RoutingTable>,
    backends: Arc<BackendManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiters: Arc<RateLimiterRegistry>,
    default_limiter: Option<Arc<RateLimiter>>,
    pool: Arc<ConnectionPool>,
    key_strategy: KeyStrategy,
    default_strategy: Strategy,
    default_timeout: Duration,
    trip_on_server_error: bool,
}

impl Gateway {
    /// Build a gateway dialling backends over HTTP.
    pub fn new(config: &GatewayConfig) -> Self {
        let connector = HttpConnectorFactory::new(Duration::from_millis(config.timeouts.connect_ms));
        Self::with_connector(config, Arc::new(connector))
    }

    /// Build a gateway with a custom backend connector.
    pub fn with_connector(config: &GatewayConfig, connector: Arc<dyn Connector>) -> Self {
        let default_limiter = config.rate_limit.enabled.then(|| {
            Arc::new(RateLimiter::new(
                f64::from(config.rate_limit.requests_per_second),
                config.rate_limit.burst_size,
            ))
        });

        Self {
            table: Arc::new(RoutingTable::new()),
            backends: Arc::new(BackendManager::new(
                config.hash_ring.virtual_nodes,
                config.load_balancer.alpha,
            )),
            breakers: Arc::new(CircuitBreakerRegistry::new(BreakerSettings::from(
                &config.circuit_breaker,
            ))),
            limiters: Arc::new(RateLimiterRegistry::new()),
            default_limiter,
            pool: Arc::new(ConnectionPool::new(connector)),
            key_strategy: config.rate_limit.key_strategy,
            default_strategy: config.load_balancer.strategy,
            default_timeout: Duration::from_millis(config.timeouts.default_request_ms),
            trip_on_server_error: config.circuit_breaker.trip_on_server_error,
        }
    }

    /// Apply the routes and rules declared in the config file.
    pub fn apply_static_config(&self, config: &GatewayConfig) -> Result<(), RoutingError> {
        for spec in &config.routes {
            let route = self.table.insert_route(spec.clone())?;
            converge_backends(&self.table, &self.backends, &route.service);
        }
        for spec in &config.rate_limit_rules {
            self.table.add_rule(spec.clone())?;
        }
        tracing::info!(
            routes = config.routes.len(),
            rules = config.rate_limit_rules.len(),
            "Static routing configuration applied"
        );
        Ok(())
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn backends(&self) -> &Arc<BackendManager> {
        &self.backends
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn limiters(&self) -> &Arc<RateLimiterRegistry> {
        &self.limiters
    }

    pub fn default_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.default_limiter.as_ref()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Resolve `(method, path)` to a route and pick a node for it using `key`.
    pub fn resolve(&self, key: &str, method: &str, path: &str) -> DispatchResult<Resolution> {
        let route = self.route_for(method, path)?;
        let backend = self.select(&route, key)?;
        Ok(Resolution { route, backend })
    }

    fn route_for(&self, method: &str, path: &str) -> DispatchResult<Arc<Route>> {
        self.table
            .resolve(method, path)
            .ok_or_else(|| DispatchError::RouteNotFound {
                method: method.to_string(),
                path: path.to_string(),
            })
    }

    fn select(&self, route: &Route, key: &str) -> DispatchResult<Arc<Backend>> {
        let strategy = route.strategy.unwrap_or(self.default_strategy);
        self.backends
            .select(&route.service, strategy, Some(key))
            .ok_or_else(|| DispatchError::ServiceUnavailable(route.service.clone()))
    }

    /// Check the default limiter, then every rule protecting the path.
    /// Runs only for requests that resolved to a route.
    fn admit(&self, call: &DispatchRequest, method: &str) -> DispatchResult<()> {
        let path = call.path();

        if let Some(limiter) = &self.default_limiter {
            let key = self.key_strategy.derive(call.caller_ip, &call.identity, path);
            if !limiter.allow(&key) {
                metrics::record_rate_limited(GLOBAL_LIMIT_SCOPE);
                return Err(DispatchError::RateLimitExceeded {
                    scope: GLOBAL_LIMIT_SCOPE.to_string(),
                    key,
                });
            }
        }

        for rule in self.table.matching_rules(method, path) {
            let limiter = self.limiters.get_or_create(&rule.name, rule.limit, rule.window());
            let key = rule.key_strategy.derive(call.caller_ip, &call.identity, path);
            if !limiter.allow(&key) {
                metrics::record_rate_limited(&rule.name);
                return Err(DispatchError::RateLimitExceeded {
                    scope: rule.name.clone(),
                    key,
                });
            }
        }
        Ok(())
    }

    /// Dispatch one request to a backend of its route's service.
    ///
    /// The route is resolved first; unroutable requests consume no tokens.
    /// Rate limiting and open circuits fail fast. Connection failures and
    /// timeouts count against the service's breaker. Nothing is retried here;
    /// `Route::retries` is for an outer layer.
    pub async fn dispatch(&self, call: DispatchRequest) -> DispatchResult<ProxyResponse> {
        let start = std::time::Instant::now();
        let method = call.request.method.as_str().to_string();

        let route = match self.route_for(&method, call.path()) {
            Ok(route) => route,
            Err(e) => {
                metrics::record_request("none", e.outcome(), start);
                tracing::debug!(method = %method, path = %call.path(), error = %e, "Request rejected");
                return Err(e);
            }
        };
        if let Err(e) = self.admit(&call, &method) {
            metrics::record_request(&route.service, e.outcome(), start);
            tracing::debug!(service = %route.service, path = %call.path(), error = %e, "Request rejected");
            return Err(e);
        }

        let result = self.forward(&route, call).await;
        match &result {
            Ok(resp) => {
                metrics::record_request(&route.service, "success", start);
                tracing::debug!(service = %route.service, status = %resp.status, "Request dispatched");
            }
            Err(e) => {
                metrics::record_request(&route.service, e.outcome(), start);
                tracing::debug!(service = %route.service, error = %e, "Dispatch failed");
            }
        }
        result
    }

    async fn forward(&self, route: &Arc<Route>, call: DispatchRequest) -> DispatchResult<ProxyResponse> {
        let caller_key = self.key_strategy.derive(call.caller_ip, &call.identity, call.path());
        let dispatch_key = call.shard_key.clone().unwrap_or(caller_key);
        let budget = route.timeout_or(self.default_timeout);
        let breaker = self.breakers.get(&route.service);

        let metadata = CallMetadata {
            user_id: call.identity.user_id,
            username: call.identity.username,
            request_id: call.request_id,
        };
        let request = call.request;

        let trip_on_server_error = self.trip_on_server_error;
        let outcome = breaker
            .call_with(
                || self.attempt(route, &dispatch_key, request, metadata, budget),
                |result| classify(result, trip_on_server_error),
            )
            .await;

        outcome.map_err(|e| match e {
            CallError::Open => DispatchError::CircuitOpen(route.service.clone()),
            CallError::Inner(e) => e,
        })
    }

    /// One guarded call: select a node, proxy, feed the latency back.
    async fn attempt(
        &self,
        route: &Route,
        key: &str,
        request: ProxyRequest,
        metadata: CallMetadata,
        budget: Duration,
    ) -> DispatchResult<ProxyResponse> {
        let backend = self.select(route, key)?;
        let started = tokio::time::Instant::now();
        let result = self
            .pool
            .proxy_request(&route.service, &backend.addr, request, metadata, Deadline::after(budget))
            .await
            .map_err(DispatchError::from);

        // Failures are fed back as a full-budget penalty sample
        let sample = match &result {
            Ok(_) => Some(started.elapsed().min(budget)),
            Err(e) if e.is_breaker_failure() => Some(budget),
            Err(_) => None,
        };
        if let Some(sample) = sample {
            self.backends
                .report_latency(&route.service, &backend.id, sample.as_secs_f64() * 1000.0);
        }
        result
    }
}

/// Breaker verdict for one attempt. Errors raised before a backend was
/// contacted, such as an empty service, leave the breaker untouched.
fn classify(result: &DispatchResult<ProxyResponse>, trip_on_server_error: bool) -> CallOutcome {
    match result {
        Ok(resp) if trip_on_server_error && resp.status.is_server_error() => CallOutcome::Failure,
        Ok(_) => CallOutcome::Success,
        Err(e) if e.is_breaker_failure() => CallOutcome::Failure,
        Err(_) => CallOutcome::Ignored,
    }
}
