//! Channels to backend services.
//!
//! A [`Channel`] is a reusable, lazily-dialled handle to one logical service;
//! a [`Connector`] creates them. The HTTP implementation wraps a hyper-util
//! client whose own keep-alive pool carries the actual sockets.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outbound metadata header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Outbound metadata header carrying the caller's username.
pub const USERNAME_HEADER: &str = "x-username";
/// Correlation header propagated to backends.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Errors from dialling or invoking a backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("invoke failed: {0}")]
    Invoke(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel closed")]
    Closed,
}

/// Connectivity state of a channel.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, nothing dialled yet.
    Idle = 0,
    Ready = 1,
    /// The last dial failed; the pool replaces the channel on next use.
    TransientFailure = 2,
    Shutdown = 3,
}

impl From<u8> for ChannelState {
    fn from(val: u8) -> Self {
        match val {
            1 => ChannelState::Ready,
            2 => ChannelState::TransientFailure,
            3 => ChannelState::Shutdown,
            _ => ChannelState::Idle,
        }
    }
}

impl ChannelState {
    /// Whether a cached channel in this state can be reused.
    pub fn is_usable(&self) -> bool {
        matches!(self, ChannelState::Idle | ChannelState::Ready)
    }
}

/// Caller identity and correlation forwarded as request metadata, never in the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMetadata {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub request_id: Option<String>,
}

impl CallMetadata {
    /// Write the metadata into outbound headers, replacing caller-supplied values.
    pub fn apply(&self, headers: &mut HeaderMap) {
        let pairs = [
            (USER_ID_HEADER, &self.user_id),
            (USERNAME_HEADER, &self.username),
            (REQUEST_ID_HEADER, &self.request_id),
        ];
        for (name, value) in pairs {
            let name = HeaderName::from_static(name);
            headers.remove(&name);
            if let Some(v) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(name, v);
            }
        }
    }
}

/// A request to forward to a backend node.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path and query, e.g. `/orders/42?full=1`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// A buffered backend response.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A reusable handle to one logical service.
pub trait Channel: Send + Sync + std::fmt::Debug {
    fn state(&self) -> ChannelState;

    /// Send `request` to the node at `target` (`host:port`).
    fn invoke(
        &self,
        target: &str,
        request: ProxyRequest,
        metadata: CallMetadata,
    ) -> BoxFuture<'_, Result<ProxyResponse, ChannelError>>;

    fn close(&self);
}

/// Creates channels for services.
pub trait Connector: Send + Sync + std::fmt::Debug {
    fn connect(&self, service: &str) -> BoxFuture<'_, Result<Arc<dyn Channel>, ChannelError>>;
}

/// Hop-by-hop headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 5] = [
    header::CONNECTION,
    header::HOST,
    header::TE,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// HTTP/1.1 channel on a hyper-util client.
///
/// One channel serves every node of its service, so its state is per
/// service: a refused connection to any node marks the whole channel
/// `TransientFailure` and the pool redials it on next use. Node-level
/// health is the balancer's concern, through the latency penalty.
#[derive(Debug)]
pub struct HttpChannel {
    service: String,
    client: Client<HttpConnector, Full<Bytes>>,
    state: AtomicU8,
}

impl HttpChannel {
    fn new(service: &str, connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            service: service.to_string(),
            client,
            state: AtomicU8::new(ChannelState::Idle as u8),
        }
    }

    fn set_state(&self, state: ChannelState) {
        // Never leave Shutdown
        let _ = self
            .state
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                (cur != ChannelState::Shutdown as u8).then_some(state as u8)
            });
    }

    async fn send(
        &self,
        target: String,
        request: ProxyRequest,
        metadata: CallMetadata,
    ) -> Result<ProxyResponse, ChannelError> {
        if self.state() == ChannelState::Shutdown {
            return Err(ChannelError::Closed);
        }

        let uri: Uri = format!("http://{}{}", target, request.path_and_query)
            .parse()
            .map_err(|e| ChannelError::Invoke(format!("invalid target uri: {}", e)))?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (k, v) in request.headers.iter() {
                if !HOP_BY_HOP.contains(k) {
                    headers.append(k.clone(), v.clone());
                }
            }
            metadata.apply(headers);
        }
        let req = builder
            .body(Full::new(request.body))
            .map_err(|e| ChannelError::Invoke(e.to_string()))?;

        let response = match self.client.request(req).await {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                self.set_state(ChannelState::TransientFailure);
                tracing::warn!(service = %self.service, target = %target, error = %e, "Backend connect failed");
                return Err(ChannelError::Connect(e.to_string()));
            }
            Err(e) => return Err(ChannelError::Invoke(e.to_string())),
        };
        self.set_state(ChannelState::Ready);

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ChannelError::Invoke(e.to_string()))?
            .to_bytes();

        Ok(ProxyResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl Channel for HttpChannel {
    fn state(&self) -> ChannelState {
        ChannelState::from(self.state.load(Ordering::Relaxed))
    }

    fn invoke(
        &self,
        target: &str,
        request: ProxyRequest,
        metadata: CallMetadata,
    ) -> BoxFuture<'_, Result<ProxyResponse, ChannelError>> {
        Box::pin(self.send(target.to_string(), request, metadata))
    }

    fn close(&self) {
        self.state.store(ChannelState::Shutdown as u8, Ordering::Relaxed);
    }
}

/// Creates [`HttpChannel`]s.
#[derive(Debug, Clone)]
pub struct HttpConnectorFactory {
    connect_timeout: Duration,
}

impl HttpConnectorFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for HttpConnectorFactory {
    fn connect(&self, service: &str) -> BoxFuture<'_, Result<Arc<dyn Channel>, ChannelError>> {
        let channel: Arc<dyn Channel> = Arc::new(HttpChannel::new(service, self.connect_timeout));
        Box::pin(async move { Ok(channel) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_overrides_caller_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("spoofed"));
        headers.insert(USERNAME_HEADER, HeaderValue::from_static("spoofed"));

        let meta = CallMetadata {
            user_id: Some("42".into()),
            username: None,
            request_id: Some("req-1".into()),
        };
        meta.apply(&mut headers);

        assert_eq!(headers.get(USER_ID_HEADER).unwrap(), "42");
        assert!(headers.get(USERNAME_HEADER).is_none());
        assert_eq!(headers.get(REQUEST_ID_HEADER).unwrap(), "req-1");
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            ChannelState::Idle,
            ChannelState::Ready,
            ChannelState::TransientFailure,
            ChannelState::Shutdown,
        ] {
            assert_eq!(ChannelState::from(state as u8), state);
        }
        assert!(ChannelState::Idle.is_usable());
        assert!(!ChannelState::TransientFailure.is_usable());
    }

    #[tokio::test]
    async fn test_refused_connect_marks_channel_failed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let channel = HttpChannel::new("svc", Duration::from_secs(1));
        let err = channel
            .invoke(&dead, ProxyRequest::new(Method::GET, "/"), CallMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Connect(_)));
        assert_eq!(channel.state(), ChannelState::TransientFailure);
        assert!(!channel.state().is_usable());
    }

    #[tokio::test]
    async fn test_closed_channel_rejects() {
        let channel = HttpChannel::new("svc", Duration::from_millis(100));
        channel.close();
        channel.set_state(ChannelState::Ready);
        assert_eq!(channel.state(), ChannelState::Shutdown);

        let err = channel
            .invoke("127.0.0.1:1", ProxyRequest::new(Method::GET, "/"), CallMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::Closed);
    }
}
