//! Desired-state events.

use crate::routing::RouteSpec;

/// One change from a declarative source.
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredStateEvent {
    /// Create or update the route bound to `spec.external_id`.
    Upsert(RouteSpec),
    /// Remove the route bound to `external_id`, if any.
    Delete { external_id: String },
}

impl DesiredStateEvent {
    /// Upsert event for a route declared by `source` under `external_id`.
    pub fn upsert(external_id: impl Into<String>, source: impl Into<String>, mut spec: RouteSpec) -> Self {
        spec.external_id = Some(external_id.into());
        spec.source = Some(source.into());
        DesiredStateEvent::Upsert(spec)
    }

    pub fn delete(external_id: impl Into<String>) -> Self {
        DesiredStateEvent::Delete {
            external_id: external_id.into(),
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match self {
            DesiredStateEvent::Upsert(spec) => spec.external_id.as_deref(),
            DesiredStateEvent::Delete { external_id } => Some(external_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_stamps_identity() {
        let spec = RouteSpec::new("/a", "GET", "svc", vec!["127.0.0.1:1".into()]);
        let event = DesiredStateEvent::upsert("ext-1", "k8s", spec);
        match &event {
            DesiredStateEvent::Upsert(spec) => {
                assert_eq!(spec.external_id.as_deref(), Some("ext-1"));
                assert_eq!(spec.source.as_deref(), Some("k8s"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(event.external_id(), Some("ext-1"));
        assert_eq!(DesiredStateEvent::delete("x").external_id(), Some("x"));
    }
}
