//! Dispatch error taxonomy.
//!
//! Every failure a caller can see has its own variant so outer layers can
//! pick a status code: admission and backpressure, not-found, or upstream
//! failure.

use axum::http::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::proxy::ChannelError;

/// Result type alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No enabled route matches the method and path.
    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// The bucket for `key` in limiter `scope` is empty.
    #[error("rate limit exceeded for {key} ({scope})")]
    RateLimitExceeded { scope: String, key: String },

    /// The breaker for the service is open and its cooldown has not elapsed.
    #[error("circuit open for service {0}")]
    CircuitOpen(String),

    /// The service has no node to send to.
    #[error("no backend available for service {0}")]
    ServiceUnavailable(String),

    /// Dialling or invoking the backend failed.
    #[error("backend connection failed: {0}")]
    ConnectionError(String),

    /// The route timeout passed before the backend answered.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// HTTP status for this error at the front door.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            DispatchError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::CircuitOpen(_) | DispatchError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Whether the circuit breaker counts this as a failure.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(self, DispatchError::ConnectionError(_) | DispatchError::Timeout(_))
    }

    /// Metric label for the outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            DispatchError::RouteNotFound { .. } => "route_not_found",
            DispatchError::RateLimitExceeded { .. } => "rate_limited",
            DispatchError::CircuitOpen(_) => "circuit_open",
            DispatchError::ServiceUnavailable(_) => "service_unavailable",
            DispatchError::ConnectionError(_) => "connection_error",
            DispatchError::Timeout(_) => "timeout",
            DispatchError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<ChannelError> for DispatchError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Timeout(budget) => DispatchError::Timeout(budget),
            other => DispatchError::ConnectionError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                DispatchError::RouteNotFound {
                    method: "GET".into(),
                    path: "/".into(),
                },
                404,
            ),
            (
                DispatchError::RateLimitExceeded {
                    scope: "global".into(),
                    key: "ip:1.2.3.4".into(),
                },
                429,
            ),
            (DispatchError::CircuitOpen("orders".into()), 503),
            (DispatchError::ServiceUnavailable("orders".into()), 503),
            (DispatchError::ConnectionError("refused".into()), 502),
            (DispatchError::Timeout(Duration::from_secs(1)), 504),
            (DispatchError::InvalidRequest("bad".into()), 400),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{}", err);
        }
    }

    #[test]
    fn test_only_upstream_failures_trip_breaker() {
        assert!(DispatchError::ConnectionError("x".into()).is_breaker_failure());
        assert!(DispatchError::Timeout(Duration::from_millis(5)).is_breaker_failure());
        assert!(!DispatchError::ServiceUnavailable("x".into()).is_breaker_failure());
        assert!(!DispatchError::CircuitOpen("x".into()).is_breaker_failure());
    }

    #[test]
    fn test_from_channel_error() {
        assert_eq!(
            DispatchError::from(ChannelError::Timeout(Duration::from_millis(10))),
            DispatchError::Timeout(Duration::from_millis(10))
        );
        assert!(matches!(
            DispatchError::from(ChannelError::Connect("refused".into())),
            DispatchError::ConnectionError(_)
        ));
    }
}
