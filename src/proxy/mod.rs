//! Backend connection pool.
//!
//! # Data Flow
//! ```text
//! Gateway::dispatch ──► ConnectionPool::proxy_request(service, node, req, deadline)
//!                              │
//!                              ├─► get_connection(service)   (cached, double-checked)
//!                              │        └─► Connector::connect on miss / unhealthy
//!                              │
//!                              └─► Channel::invoke(node, req, metadata)
//! ```
//!
//! # Design Decisions
//! - One channel per logical service; the node address is chosen per call
//! - Caller identity travels as metadata headers, never in the payload
//! - Every call is bounded by the route deadline; dropping the future cancels it

pub mod channel;
pub mod pool;

pub use channel::{
    CallMetadata, Channel, ChannelError, ChannelState, Connector, HttpConnectorFactory,
    ProxyRequest, ProxyResponse,
};
pub use pool::ConnectionPool;
