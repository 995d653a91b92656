//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all problems at once)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! Declared-routes file (optional):
//!     watcher.rs detects change
//!     → reloads and diffs against the last declaration set
//!     → DesiredStateEvent stream → reconcile::Reconciler
//! ```
//!
//! # Design Decisions
//! - Gateway config is immutable once loaded; routes change through the table's write path
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, GatewayConfig, HashRingConfig, ListenerConfig,
    LoadBalancerConfig, ObservabilityConfig, RateLimitConfig, Strategy, SyncConfig,
    TimeoutConfig,
};
