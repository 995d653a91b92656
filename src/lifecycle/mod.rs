//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → servers stop accepting → background loops exit → pool closed
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core state, then background tasks, then listeners
//! - Background loops select on the shutdown receiver and never block in-flight requests

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
