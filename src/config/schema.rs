//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::routing::{RateLimitRuleSpec, RouteSpec};
use crate::security::KeyStrategy;

/// Root configuration for the dispatch gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Consistent hash ring settings.
    pub hash_ring: HashRingConfig,

    /// Latency-aware balancer settings.
    pub load_balancer: LoadBalancerConfig,

    /// Per-service circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Default per-caller rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Declarative sync settings.
    pub sync: SyncConfig,

    /// Routes applied at startup.
    pub routes: Vec<RouteSpec>,

    /// Rate-limit rules applied at startup.
    pub rate_limit_rules: Vec<RateLimitRuleSpec>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Consistent hash ring configuration.
///
/// The virtual node count trades assignment uniformity for ring size. Changing it
/// remaps most keys, so it should stay fixed for the life of a deployment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HashRingConfig {
    /// Ring positions per physical backend.
    pub virtual_nodes: usize,
}

impl Default for HashRingConfig {
    fn default() -> Self {
        Self { virtual_nodes: 100 }
    }
}

/// Node selection strategy for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Lowest EWMA latency wins.
    #[default]
    Latency,
    /// Sticky assignment through the consistent hash ring.
    Hash,
}

/// EWMA load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Smoothing factor in (0, 1]. Smaller reacts slower.
    pub alpha: f64,

    /// Strategy used by routes that do not specify one.
    pub strategy: Strategy,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            strategy: Strategy::Latency,
        }
    }
}

/// Circuit breaker thresholds, shared by every per-service breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub max_failures: u32,

    /// Time an open circuit rejects calls before allowing a trial, in milliseconds.
    pub cooldown_ms: u64,

    /// Consecutive half-open successes that close the circuit.
    pub half_open_success: u32,

    /// Count 5xx backend responses as failures. Off: only unreachable
    /// backends and timeouts count.
    pub trip_on_server_error: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            cooldown_ms: 30_000,
            half_open_success: 2,
            trip_on_server_error: false,
        }
    }
}

/// Default rate limiting applied to every dispatched request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the default limiter.
    pub enabled: bool,

    /// Refill rate per key.
    pub requests_per_second: u32,

    /// Burst capacity per key.
    pub burst_size: u32,

    /// Interval at which all buckets are discarded, in seconds.
    pub sweep_interval_secs: u64,

    /// How the limiter key is derived from the caller.
    pub key_strategy: KeyStrategy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 100,
            burst_size: 50,
            sweep_interval_secs: 300,
            key_strategy: KeyStrategy::Ip,
        }
    }
}

/// Timeout configuration for backend calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout for routes that do not declare one, in milliseconds.
    pub default_request_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_request_ms: 30_000,
            connect_ms: 5_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Declarative sync configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Declared-routes file watched for changes.
    pub routes_file: Option<String>,

    /// Capacity of the desired-state event channel.
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            routes_file: None,
            channel_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.hash_ring.virtual_nodes, 100);
        assert_eq!(config.circuit_breaker.max_failures, 5);
        assert_eq!(config.load_balancer.strategy, Strategy::Latency);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let raw = r#"
            [load_balancer]
            alpha = 0.5
            strategy = "hash"

            [rate_limit]
            enabled = true
            key_strategy = "ip_path"

            [[routes]]
            path = "/orders/{id}"
            method = "GET"
            service = "orders"
            backends = ["10.0.0.1:7000", "10.0.0.2:7000"]
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.load_balancer.strategy, Strategy::Hash);
        assert_eq!(config.rate_limit.key_strategy, KeyStrategy::IpPath);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].backends.len(), 2);
        assert!(config.routes[0].enabled);
    }
}
