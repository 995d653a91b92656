//! Admin API.
//!
//! # Data Flow
//! ```text
//! HTTP (bearer api_key)
//!     → auth.rs (reject without the configured key)
//!     → handlers.rs (JSON in/out, error → status)
//!     → service.rs (AdminService: table write path + persistence)
//! ```

pub mod auth;
pub mod handlers;
pub mod service;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::dispatch::Gateway;

pub use service::{AdminError, AdminResult, AdminService, RoutePage};

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub service: AdminService,
    pub gateway: Arc<Gateway>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(list_routes).post(create_route))
        .route("/admin/routes/{id}", delete(delete_route))
        .route("/admin/rules", get(list_rules).post(create_rule))
        .route("/admin/rules/{name}", delete(delete_rule))
        .route("/admin/health", get(get_health))
        .route("/admin/breakers", get(get_breakers))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
