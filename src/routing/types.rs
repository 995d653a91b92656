//! Route and rate-limit rule records.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::schema::Strategy;
use crate::routing::matcher::PathPattern;
use crate::security::KeyStrategy;

/// Method token that matches every HTTP method.
pub const ANY_METHOD: &str = "*";

/// Errors raised by routing table and store mutations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// Another enabled route already serves this path and method.
    #[error("route conflict: {method} {path} is already served by route {existing}")]
    Conflict {
        method: String,
        path: String,
        existing: Uuid,
    },

    /// A rate-limit rule with this name already exists.
    #[error("rate limit rule '{0}' already exists")]
    DuplicateRule(String),

    /// The external identifier belongs to a different route.
    #[error("external id '{0}' is already bound to another route")]
    DuplicateExternalId(String),

    #[error("route {0} not found")]
    RouteNotFound(Uuid),

    #[error("rate limit rule '{0}' not found")]
    RuleNotFound(String),

    /// The path pattern could not be compiled.
    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A required field is missing or out of range.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Normalize a method token: upper-case, with `ANY` folded into `*`.
pub fn normalize_method(method: &str) -> String {
    let method = method.trim().to_ascii_uppercase();
    if method.is_empty() || method == "ANY" {
        ANY_METHOD.to_string()
    } else {
        method
    }
}

/// Accept backends either as a list or as a comma-separated string.
fn deserialize_backends<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Backends {
        Joined(String),
        List(Vec<String>),
    }

    let raw = match Backends::deserialize(deserializer)? {
        Backends::Joined(s) => s.split(',').map(str::to_string).collect(),
        Backends::List(list) => list,
    };
    Ok(split_backends(raw))
}

fn split_backends(raw: Vec<String>) -> Vec<String> {
    raw.into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_any_method() -> String {
    ANY_METHOD.to_string()
}

fn default_window_secs() -> u64 {
    1
}

/// Desired fields of a route, as declared by an operator or a sync source.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteSpec {
    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Path pattern, e.g. `/orders/{id}` or `/static/*`.
    pub path: String,

    /// HTTP method, or `*` for any.
    pub method: String,

    /// Logical downstream service name.
    pub service: String,

    /// Backend addresses (`host:port`).
    #[serde(deserialize_with = "deserialize_backends")]
    pub backends: Vec<String>,

    /// Per-call timeout in milliseconds; the gateway default applies when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Retry budget for an outer retrying layer. Not enforced by the core.
    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Stable identifier from a declarative source; the reconciliation key.
    #[serde(default)]
    pub external_id: Option<String>,

    /// Label of the source that declared the route.
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub description: String,

    /// Node selection strategy; the gateway default applies when absent.
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

impl RouteSpec {
    /// Minimal enabled route.
    pub fn new(
        path: impl Into<String>,
        method: impl Into<String>,
        service: impl Into<String>,
        backends: Vec<String>,
    ) -> Self {
        Self {
            name: String::new(),
            path: path.into(),
            method: method.into(),
            service: service.into(),
            backends,
            timeout_ms: None,
            retries: 0,
            enabled: true,
            external_id: None,
            source: None,
            description: String::new(),
            strategy: None,
        }
    }

    /// Normalize and check the fields, compiling the path pattern.
    pub fn validate(mut self) -> Result<(Self, PathPattern), RoutingError> {
        self.method = normalize_method(&self.method);
        self.service = self.service.trim().to_string();
        self.backends = split_backends(self.backends);
        self.external_id = self
            .external_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        if self.service.is_empty() {
            return Err(RoutingError::Invalid {
                field: "service",
                reason: "must not be empty".into(),
            });
        }
        if self.backends.is_empty() {
            return Err(RoutingError::Invalid {
                field: "backends",
                reason: "at least one backend address is required".into(),
            });
        }
        if self.timeout_ms == Some(0) {
            return Err(RoutingError::Invalid {
                field: "timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        let pattern = PathPattern::parse(&self.path)?;
        Ok((self, pattern))
    }
}

/// A declared route as held by the routing table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub id: Uuid,
    /// Registration order, used to break matching ties.
    pub seq: u64,
    pub name: String,
    pub path: String,
    pub method: String,
    pub service: String,
    pub backends: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub retries: u32,
    pub enabled: bool,
    pub external_id: Option<String>,
    pub source: Option<String>,
    pub description: String,
    pub strategy: Option<Strategy>,
}

impl Route {
    /// Build a route from a validated spec.
    pub fn from_spec(id: Uuid, seq: u64, spec: RouteSpec) -> Self {
        Self {
            id,
            seq,
            name: spec.name,
            path: spec.path,
            method: spec.method,
            service: spec.service,
            backends: spec.backends,
            timeout_ms: spec.timeout_ms,
            retries: spec.retries,
            enabled: spec.enabled,
            external_id: spec.external_id,
            source: spec.source,
            description: spec.description,
            strategy: spec.strategy,
        }
    }

    /// The declared fields of this route.
    pub fn to_spec(&self) -> RouteSpec {
        RouteSpec {
            name: self.name.clone(),
            path: self.path.clone(),
            method: self.method.clone(),
            service: self.service.clone(),
            backends: self.backends.clone(),
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            enabled: self.enabled,
            external_id: self.external_id.clone(),
            source: self.source.clone(),
            description: self.description.clone(),
            strategy: self.strategy,
        }
    }

    /// Overwrite the declared fields in place, keeping identity and order.
    pub fn apply(&mut self, spec: RouteSpec) {
        *self = Route::from_spec(self.id, self.seq, spec);
    }

    /// The route's timeout, or `default` when none is declared.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    /// Whether this route serves `method`.
    pub fn accepts_method(&self, method: &str) -> bool {
        self.method == ANY_METHOD || self.method.eq_ignore_ascii_case(method)
    }
}

/// Desired fields of a rate-limit rule.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimitRuleSpec {
    /// Unique rule name.
    pub name: String,

    /// Path pattern the rule protects.
    pub path: String,

    /// HTTP method, or `*` for any.
    #[serde(default = "default_any_method")]
    pub method: String,

    /// Requests admitted per window.
    pub limit: u32,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How the limiter key is derived for this rule.
    #[serde(default)]
    pub key_strategy: KeyStrategy,
}

impl RateLimitRuleSpec {
    /// Rule admitting `limit` requests per second on `path`, any method, keyed by IP.
    pub fn new(name: impl Into<String>, path: impl Into<String>, limit: u32) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            method: ANY_METHOD.to_string(),
            limit,
            window_secs: default_window_secs(),
            enabled: true,
            key_strategy: KeyStrategy::default(),
        }
    }

    pub fn validate(mut self) -> Result<(Self, PathPattern), RoutingError> {
        self.name = self.name.trim().to_string();
        self.method = normalize_method(&self.method);
        if self.name.is_empty() {
            return Err(RoutingError::Invalid {
                field: "name",
                reason: "must not be empty".into(),
            });
        }
        if self.limit == 0 {
            return Err(RoutingError::Invalid {
                field: "limit",
                reason: "must be greater than zero".into(),
            });
        }
        if self.window_secs == 0 {
            return Err(RoutingError::Invalid {
                field: "window_secs",
                reason: "must be greater than zero".into(),
            });
        }
        let pattern = PathPattern::parse(&self.path)?;
        Ok((self, pattern))
    }
}

/// A rate-limit rule as held by the routing table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitRule {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub method: String,
    pub limit: u32,
    pub window_secs: u64,
    pub enabled: bool,
    pub key_strategy: KeyStrategy,
}

impl RateLimitRule {
    pub fn from_spec(id: Uuid, spec: RateLimitRuleSpec) -> Self {
        Self {
            id,
            name: spec.name,
            path: spec.path,
            method: spec.method,
            limit: spec.limit,
            window_secs: spec.window_secs,
            enabled: spec.enabled,
            key_strategy: spec.key_strategy,
        }
    }

    pub fn to_spec(&self) -> RateLimitRuleSpec {
        RateLimitRuleSpec {
            name: self.name.clone(),
            path: self.path.clone(),
            method: self.method.clone(),
            limit: self.limit,
            window_secs: self.window_secs,
            enabled: self.enabled,
            key_strategy: self.key_strategy,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn accepts_method(&self, method: &str) -> bool {
        self.method == ANY_METHOD || self.method.eq_ignore_ascii_case(method)
    }
}
