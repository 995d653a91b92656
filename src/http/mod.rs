//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, ConnectInfo for the caller IP)
//!     → request.rs (request ID, identity headers, body buffering)
//!     → dispatch::Gateway::dispatch
//!     → server.rs (backend response or taxonomy status code)
//!     → Send to client
//! ```

pub mod request;
pub mod server;

pub use request::{X_REQUEST_ID, X_SHARD_KEY};
pub use server::{AppState, HttpServer};
