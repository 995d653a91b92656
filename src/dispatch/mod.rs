//! Request dispatch.
//!
//! # Data Flow
//! ```text
//! DispatchRequest (caller ip, identity, shard key, request)
//!     → default limiter (per caller key)
//!     → RoutingTable::resolve(method, path)         404 RouteNotFound
//!     → rule limiters matching the path              429 RateLimitExceeded
//!     → CircuitBreaker for route.service             503 CircuitOpen
//!         → BackendManager::select(strategy, key)    503 ServiceUnavailable
//!         → ConnectionPool::proxy_request(deadline)  502 / 504
//!         → latency fed back to the EWMA balancer
//!     → ProxyResponse
//! ```
//!
//! # Design Decisions
//! - Registries are owned by a `Gateway` value, never process globals
//! - Only connection errors and timeouts count as breaker failures
//! - No retries inside the core

pub mod error;
pub mod gateway;

pub use error::{DispatchError, DispatchResult};
pub use gateway::{DispatchRequest, Gateway, Resolution, GLOBAL_LIMIT_SCOPE};
