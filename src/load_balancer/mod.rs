//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → service identified
//!     → pool.rs (service group: ring + balancer)
//!     → Apply selection strategy:
//!         - hash_ring.rs (sticky: dispatch key → node)
//!         - ewma.rs (lowest latency estimate)
//!     → backend.rs (node address handed to the connection pool)
//!
//! After the call:
//!     latency sample → ewma.rs → backend.rs estimate
//! ```
//!
//! # Design Decisions
//! - Ring and balancer hold the same node ids; only the balancer tracks latency
//! - Ring reads use a swapped snapshot; balancer uses one RwLock per service
//! - Node sets follow the routing table (reconciliation feeds them)

pub mod backend;
pub mod ewma;
pub mod hash_ring;
pub mod pool;

pub use backend::Backend;
pub use ewma::EwmaBalancer;
pub use hash_ring::HashRing;
pub use pool::BackendManager;
