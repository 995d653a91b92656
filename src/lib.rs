//! Edge dispatch core for an API gateway.
//!
//! Resolves inbound requests to declared routes, admits them through
//! per-key token buckets, guards each downstream service with a circuit
//! breaker, picks a node by EWMA latency or consistent hashing and forwards
//! the call over a pooled channel with a route-level deadline.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod http;
pub mod proxy;
pub mod routing;

// Traffic management
pub mod load_balancer;
pub mod reconcile;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use dispatch::{DispatchError, Gateway};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
