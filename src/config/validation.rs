//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, alpha in (0, 1], addresses parse)
//! - Check static routes and rules the same way the routing table will
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Whether `addr` looks like `host:port`.
pub fn is_backend_address(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p > 0),
        None => false,
    }
}

fn check_socket(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{}'", value)));
    }
}

/// Check a configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_socket(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_socket(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if config.hash_ring.virtual_nodes == 0 {
        errors.push(ValidationError::new("hash_ring.virtual_nodes", "must be greater than zero"));
    }
    let alpha = config.load_balancer.alpha;
    if !(alpha > 0.0 && alpha <= 1.0) {
        errors.push(ValidationError::new("load_balancer.alpha", format!("must be in (0, 1], got {}", alpha)));
    }

    if config.circuit_breaker.max_failures == 0 {
        errors.push(ValidationError::new("circuit_breaker.max_failures", "must be greater than zero"));
    }
    if config.circuit_breaker.half_open_success == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_success", "must be greater than zero"));
    }

    if config.rate_limit.burst_size == 0 {
        errors.push(ValidationError::new("rate_limit.burst_size", "must be greater than zero"));
    }
    if config.rate_limit.requests_per_second == 0 {
        errors.push(ValidationError::new("rate_limit.requests_per_second", "must be greater than zero"));
    }
    if config.rate_limit.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("rate_limit.sweep_interval_secs", "must be greater than zero"));
    }

    if config.timeouts.default_request_ms == 0 {
        errors.push(ValidationError::new("timeouts.default_request_ms", "must be greater than zero"));
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be greater than zero"));
    }
    if config.sync.channel_capacity == 0 {
        errors.push(ValidationError::new("sync.channel_capacity", "must be greater than zero"));
    }

    let mut seen_routes = HashSet::new();
    for (i, spec) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        match spec.clone().validate() {
            Ok((spec, _)) => {
                for addr in spec.backends.iter().filter(|a| !is_backend_address(a)) {
                    errors.push(ValidationError::new(
                        format!("{}.backends", field),
                        format!("invalid backend address '{}'", addr),
                    ));
                }
                if spec.enabled && !seen_routes.insert((spec.method.clone(), spec.path.clone())) {
                    errors.push(ValidationError::new(
                        field,
                        format!("duplicate route {} {}", spec.method, spec.path),
                    ));
                }
            }
            Err(e) => errors.push(ValidationError::new(field, e.to_string())),
        }
    }

    let mut seen_rules = HashSet::new();
    for (i, spec) in config.rate_limit_rules.iter().enumerate() {
        let field = format!("rate_limit_rules[{}]", i);
        match spec.clone().validate() {
            Ok((spec, _)) => {
                if !seen_rules.insert(spec.name.clone()) {
                    errors.push(ValidationError::new(field, format!("duplicate rule name '{}'", spec.name)));
                }
            }
            Err(e) => errors.push(ValidationError::new(field, e.to_string())),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{RateLimitRuleSpec, RouteSpec};

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = GatewayConfig::default();
        config.hash_ring.virtual_nodes = 0;
        config.load_balancer.alpha = 0.0;
        config.circuit_breaker.max_failures = 0;
        config.circuit_breaker.half_open_success = 0;
        config.rate_limit.burst_size = 0;
        config.listener.bind_address = "nope".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "hash_ring.virtual_nodes",
                "load_balancer.alpha",
                "circuit_breaker.max_failures",
                "circuit_breaker.half_open_success",
                "rate_limit.burst_size",
            ]
        );
    }

    #[test]
    fn test_route_checks() {
        let mut config = GatewayConfig::default();
        config.routes.push(RouteSpec::new("/a", "GET", "svc", vec!["10.0.0.1".into()]));
        config.routes.push(RouteSpec::new("/b", "GET", "", vec!["10.0.0.1:80".into()]));
        config.routes.push(RouteSpec::new("/c", "get", "svc", vec!["backend:8080".into()]));
        config.routes.push(RouteSpec::new("/c", "GET", "svc", vec!["backend:8080".into()]));
        config.rate_limit_rules.push(RateLimitRuleSpec::new("r", "/a", 5));
        config.rate_limit_rules.push(RateLimitRuleSpec::new("r", "/b", 5));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4, "{:?}", errors);
        assert_eq!(errors[0].field, "routes[0].backends");
        assert_eq!(errors[1].field, "routes[1]");
        assert_eq!(errors[2].field, "routes[3]");
        assert_eq!(errors[3].field, "rate_limit_rules[1]");
    }

    #[test]
    fn test_backend_address_shape() {
        assert!(is_backend_address("10.0.0.1:80"));
        assert!(is_backend_address("orders.svc.local:8080"));
        assert!(!is_backend_address("10.0.0.1"));
        assert!(!is_backend_address(":80"));
        assert!(!is_backend_address("host:0"));
    }
}
