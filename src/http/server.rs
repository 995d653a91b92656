//! HTTP front door.
//!
//! # Responsibilities
//! - Create the Axum router forwarding every path to the gateway
//! - Wire up middleware (tracing, request ID)
//! - Map dispatch errors to distinguishable status codes
//! - Serve until the shutdown signal fires

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::dispatch::{DispatchError, DispatchRequest, Gateway};
use crate::http::request::{
    caller_identity, into_proxy_request, propagate_request_id_layer, request_id,
    set_request_id_layer, shard_key, MAX_BODY_BYTES,
};
use crate::lifecycle::Shutdown;
use crate::proxy::ProxyResponse;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// The gateway's public HTTP server.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let router = Self::build_router(AppState { gateway });
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(dispatch_handler))
            .route("/{*path}", any(dispatch_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Forward any request through the gateway.
async fn dispatch_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let headers = req.headers();
    let identity = caller_identity(headers);
    let shard = shard_key(headers);
    let request_id = request_id(headers);

    let request = match into_proxy_request(req).await {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    let call = DispatchRequest {
        caller_ip: addr.ip(),
        identity,
        shard_key: shard,
        request_id,
        request,
    };

    match state.gateway.dispatch(call).await {
        Ok(resp) => proxy_response(resp),
        Err(e) => error_response(&e),
    }
}

/// Headers describing the backend connection rather than the payload.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name == header::TE
        || name == HeaderName::from_static("keep-alive")
}

fn proxy_response(resp: ProxyResponse) -> Response {
    let mut response = Response::new(Body::from(resp.body));
    *response.status_mut() = resp.status;
    let headers = response.headers_mut();
    for (name, value) in resp.headers.iter() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    response
}

/// JSON error body with the status the taxonomy maps to.
pub fn error_response(err: &DispatchError) -> Response {
    let status = err.status_code();
    let body = Json(serde_json::json!({
        "error": err.outcome(),
        "message": err.to_string(),
    }));
    let mut response = (status, body).into_response();
    if status == StatusCode::TOO_MANY_REQUESTS {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}
