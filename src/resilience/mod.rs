//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a backend service:
//!     → circuit_breaker.rs (fail fast if the service's circuit is open)
//!     → timeouts.rs (one deadline for connect + invoke)
//!     → On error, timeout or 5xx: circuit_breaker.rs records a failure
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - No retries inside the core; a route's retry count is for outer layers
//! - Circuit breaker prevents cascading failures, one breaker per service

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerSettings, BreakerSnapshot, CallError, CallOutcome, CircuitBreaker, CircuitBreakerRegistry, CircuitState,
};
pub use timeouts::{Deadline, TimedOut};
