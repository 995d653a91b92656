//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch (read path):
//!     (method, path)
//!     → table.rs (load current snapshot)
//!     → matcher.rs (most specific enabled pattern wins)
//!     → Return: matched Route or None
//!
//! Mutations (write path, admin API and reconciliation alike):
//!     RouteSpec / RateLimitRuleSpec
//!     → types.rs (normalize + validate)
//!     → table.rs (copy snapshot, apply, swap)
//!     → store.rs (admin mutations are also persisted)
//! ```
//!
//! # Design Decisions
//! - Lookups never block behind writers (snapshot-and-swap)
//! - One enabled route per (path, method); conflicts are rejected at write time
//! - External identifiers are unique and are the reconciliation key

pub mod matcher;
pub mod store;
pub mod table;
pub mod types;

pub use matcher::PathPattern;
pub use store::{InMemoryStore, RouteStore, StoreError, StoreResult};
pub use table::{RoutingTable, UpsertOutcome};
pub use types::{RateLimitRule, RateLimitRuleSpec, Route, RouteSpec, RoutingError};
