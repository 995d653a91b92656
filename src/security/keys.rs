//! Rate-limit key derivation.
//!
//! A key names the bucket a request draws from. Strategies are selectable per
//! protected route, so the same caller can be limited by IP on one route and
//! by user identity on another.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Caller identity, already validated by the authentication layer in front of
/// the gateway. The core only forwards it as outbound metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
    pub username: Option<String>,
}

impl CallerIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            username: None,
        }
    }
}

/// How a limiter key is derived from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Caller IP address.
    #[default]
    Ip,
    /// Authenticated user id, falling back to IP for anonymous callers.
    User,
    /// Caller IP combined with the request path.
    IpPath,
}

impl KeyStrategy {
    /// Derive the limiter key for a request.
    pub fn derive(&self, ip: IpAddr, identity: &CallerIdentity, path: &str) -> String {
        match self {
            KeyStrategy::Ip => format!("ip:{}", ip),
            KeyStrategy::User => match identity.user_id.as_deref() {
                Some(user) if !user.is_empty() => format!("user:{}", user),
                _ => format!("ip:{}", ip),
            },
            KeyStrategy::IpPath => format!("ip:{}:{}", ip, path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let anon = CallerIdentity::anonymous();
        let alice = CallerIdentity::user("alice");

        assert_eq!(KeyStrategy::Ip.derive(ip, &alice, "/a"), "ip:1.2.3.4");
        assert_eq!(KeyStrategy::User.derive(ip, &alice, "/a"), "user:alice");
        // Anonymous callers fall back to IP
        assert_eq!(KeyStrategy::User.derive(ip, &anon, "/a"), "ip:1.2.3.4");
        assert_eq!(KeyStrategy::IpPath.derive(ip, &anon, "/a"), "ip:1.2.3.4:/a");
    }
}
