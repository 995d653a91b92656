//! Route path pattern matching.
//!
//! # Responsibilities
//! - Compile declared path patterns into segment lists
//! - Match request paths against compiled patterns
//! - Rank patterns so the most specific match wins
//!
//! # Pattern Syntax
//! - `/orders/list` literal segments (case-sensitive)
//! - `/orders/{id}` or `/orders/:id` one arbitrary segment
//! - `/static/*` or `/static/{*rest}` any remainder, including none
//!
//! Empty segments are ignored, so `/a/` and `/a` are the same pattern.

use std::cmp::Reverse;

use crate::routing::types::RoutingError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
    CatchAll,
}

/// A compiled route path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern.
    pub fn parse(pattern: &str) -> Result<Self, RoutingError> {
        let invalid = |reason: &str| RoutingError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let raw: Vec<&str> = split_path(pattern).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, seg) in raw.iter().enumerate() {
            let segment = if *seg == "*" || seg.starts_with("{*") || (seg.starts_with('*') && seg.len() > 1) {
                if i + 1 != raw.len() {
                    return Err(invalid("catch-all must be the last segment"));
                }
                Segment::CatchAll
            } else if let Some(name) = seg.strip_prefix('{') {
                match name.strip_suffix('}') {
                    Some(n) if !n.is_empty() => Segment::Param,
                    _ => return Err(invalid("malformed '{param}' segment")),
                }
            } else if let Some(name) = seg.strip_prefix(':') {
                if name.is_empty() {
                    return Err(invalid("empty ':param' segment"));
                }
                Segment::Param
            } else {
                Segment::Literal((*seg).to_string())
            };
            segments.push(segment);
        }

        Ok(Self { segments })
    }

    /// Returns true if `path` matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split_path(path);
        for segment in &self.segments {
            match segment {
                Segment::CatchAll => return true,
                Segment::Param => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(lit) => match parts.next() {
                    Some(part) if part == lit => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }

    /// Ordering key: larger is more specific.
    ///
    /// More literal segments first, then no catch-all, then fewer parameters.
    pub fn specificity(&self) -> (usize, bool, Reverse<usize>) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        let params = self.segments.iter().filter(|s| **s == Segment::Param).count();
        let catch_all = self.segments.last() == Some(&Segment::CatchAll);
        (literals, !catch_all, Reverse(params))
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    // Query strings never take part in matching.
    let path = path.split('?').next().unwrap_or_default();
    path.split('/').filter(|s| !s.is_empty())
}
