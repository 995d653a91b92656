//! Request handling and transformation.
//!
//! # Responsibilities
//! - Assign a request id (UUID v4) as early as possible and echo it back
//! - Extract caller identity and shard key set by the layer in front
//! - Buffer the inbound request into a [`ProxyRequest`]
//!
//! # Design Decisions
//! - Identity headers are trusted: authentication happens before the gateway
//! - Bodies are buffered up to a fixed limit before dispatch

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, HeaderName, Request};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::dispatch::DispatchError;
use crate::proxy::channel::{REQUEST_ID_HEADER, USERNAME_HEADER, USER_ID_HEADER};
use crate::proxy::ProxyRequest;
use crate::security::CallerIdentity;

/// Request id header, shared with outbound metadata.
pub const X_REQUEST_ID: &str = REQUEST_ID_HEADER;
/// Caller-supplied key for hash routing.
pub const X_SHARD_KEY: &str = "x-shard-key";
/// Largest request body the gateway buffers.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Layer assigning `x-request-id` to requests that lack one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Layer copying `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    header_string(headers, X_REQUEST_ID)
}

pub fn shard_key(headers: &HeaderMap) -> Option<String> {
    header_string(headers, X_SHARD_KEY)
}

/// Identity asserted by the authentication step in front of the gateway.
pub fn caller_identity(headers: &HeaderMap) -> CallerIdentity {
    CallerIdentity {
        user_id: header_string(headers, USER_ID_HEADER),
        username: header_string(headers, USERNAME_HEADER),
    }
}

/// Buffer an inbound request for forwarding.
pub async fn into_proxy_request(req: Request<Body>) -> Result<ProxyRequest, DispatchError> {
    let (parts, body) = req.into_parts();
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| DispatchError::InvalidRequest(format!("failed to read body: {}", e)))?;
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    Ok(ProxyRequest {
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Method};

    #[test]
    fn test_identity_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));
        headers.insert(USERNAME_HEADER, HeaderValue::from_static(" "));
        headers.insert(X_SHARD_KEY, HeaderValue::from_static("tenant-a"));

        let identity = caller_identity(&headers);
        assert_eq!(identity.user_id.as_deref(), Some("42"));
        assert_eq!(identity.username, None);
        assert_eq!(shard_key(&headers).as_deref(), Some("tenant-a"));
        assert_eq!(request_id(&headers), None);
    }

    #[tokio::test]
    async fn test_into_proxy_request() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("http://gateway.local/orders?x=1")
            .body(Body::from("payload"))
            .unwrap();
        let proxied = into_proxy_request(req).await.unwrap();
        assert_eq!(proxied.method, Method::POST);
        assert_eq!(proxied.path_and_query, "/orders?x=1");
        assert_eq!(proxied.body, "payload");
    }
}
