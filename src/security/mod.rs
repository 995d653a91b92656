//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatched request:
//!     → keys.rs (derive limiter key: ip | user | ip+path)
//!     → rate_limit.rs (default limiter, then every matching rule's limiter)
//!     → Pass to circuit breaker / node selection
//!
//! Background:
//!     rate_limit::run_sweeper discards all buckets every interval
//! ```
//!
//! # Design Decisions
//! - Fail closed: an empty bucket rejects the request, no queueing
//! - Buckets are independently keyed; one hot key never slows another
//! - Coarse sweep bounds memory under IP churn

pub mod keys;
pub mod rate_limit;

pub use keys::{CallerIdentity, KeyStrategy};
pub use rate_limit::{RateLimiter, RateLimiterRegistry};
