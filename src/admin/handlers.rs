use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::admin::service::{AdminError, RoutePage, DEFAULT_PAGE_SIZE};
use crate::admin::AdminState;
use crate::resilience::{BreakerSnapshot, CircuitState};
use crate::routing::{RateLimitRule, RateLimitRuleSpec, Route, RouteSpec, RoutingError};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes: usize,
    pub rules: usize,
    pub services: Vec<String>,
    pub open_circuits: usize,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "first_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn first_page() -> usize {
    1
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::Routing(RoutingError::Conflict { .. })
            | AdminError::Routing(RoutingError::DuplicateRule(_))
            | AdminError::Routing(RoutingError::DuplicateExternalId(_)) => StatusCode::CONFLICT,
            AdminError::Routing(RoutingError::RouteNotFound(_))
            | AdminError::Routing(RoutingError::RuleNotFound(_)) => StatusCode::NOT_FOUND,
            AdminError::Routing(_) => StatusCode::BAD_REQUEST,
            AdminError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let gateway = &state.gateway;
    let open_circuits = gateway
        .breakers()
        .snapshots()
        .iter()
        .filter(|s| s.state != CircuitState::Closed)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        routes: gateway.table().route_count(),
        rules: gateway.table().rules().len(),
        services: gateway.backends().services(),
        open_circuits,
    })
}

pub async fn list_routes(
    State(state): State<AdminState>,
    Query(params): Query<PageParams>,
) -> Json<RoutePage> {
    Json(state.service.list_routes(params.page, params.page_size))
}

pub async fn create_route(
    State(state): State<AdminState>,
    Json(spec): Json<RouteSpec>,
) -> Result<(StatusCode, Json<Route>), AdminError> {
    let route = state.service.register_route(spec).await?;
    Ok((StatusCode::CREATED, Json(Route::clone(&route))))
}

pub async fn delete_route(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Route>, AdminError> {
    let route = state.service.delete_route(id).await?;
    Ok(Json(Route::clone(&route)))
}

pub async fn list_rules(State(state): State<AdminState>) -> Json<Vec<RateLimitRule>> {
    Json(
        state
            .service
            .list_rules()
            .iter()
            .map(|r| RateLimitRule::clone(r))
            .collect(),
    )
}

pub async fn create_rule(
    State(state): State<AdminState>,
    Json(spec): Json<RateLimitRuleSpec>,
) -> Result<(StatusCode, Json<RateLimitRule>), AdminError> {
    let rule = state.service.add_rule(spec).await?;
    Ok((StatusCode::CREATED, Json(RateLimitRule::clone(&rule))))
}

pub async fn delete_rule(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<RateLimitRule>, AdminError> {
    let rule = state.service.delete_rule(&name).await?;
    Ok(Json(RateLimitRule::clone(&rule)))
}

/// Reachability of every pooled service connection.
pub async fn get_health(State(state): State<AdminState>) -> Json<BTreeMap<String, bool>> {
    Json(state.gateway.pool().health_check().await.into_iter().collect())
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.gateway.breakers().snapshots())
}
