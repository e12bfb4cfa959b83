//! Endpoint path patterns.
//!
//! # Responsibilities
//! - Parse patterns such as `/users/{id}/orders/{order}`
//! - Match request paths and extract named params
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - A param spans exactly one non-empty segment
//! - Trailing slashes are ignored on both sides
//! - No regex to guarantee O(n) matching

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl PathPattern {
    /// Parse a pattern. Returns `None` when it does not start with `/`,
    /// has a malformed or empty param, or repeats a param name.
    pub fn parse(pattern: &str) -> Option<Self> {
        if !pattern.starts_with('/') {
            return None;
        }

        let mut segments = Vec::new();
        for segment in split(pattern) {
            let parsed = match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => {
                    if name.is_empty() || name.contains(['{', '}']) {
                        return None;
                    }
                    if segments.contains(&Segment::Param(name.to_string())) {
                        return None;
                    }
                    Segment::Param(name.to_string())
                }
                None if segment.contains(['{', '}']) => return None,
                None => Segment::Literal(segment.to_string()),
            };
            segments.push(parsed);
        }

        Some(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Number of literal segments; more literals means a more specific
    /// pattern.
    pub fn specificity(&self) -> (usize, usize) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (literals, self.segments.len())
    }

    /// Match `path`, returning the extracted params.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split(path);
        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert!(PathPattern::parse("/").is_some());
        assert!(PathPattern::parse("/users/{id}").is_some());
        assert!(PathPattern::parse("users").is_none());
        assert!(PathPattern::parse("/users/{}").is_none());
        assert!(PathPattern::parse("/users/{id").is_none());
        assert!(PathPattern::parse("/a/{id}/b/{id}").is_none());
        assert!(PathPattern::parse("/a/x{id}").is_none());
    }

    #[test]
    fn test_matches_and_extracts() {
        let pattern = PathPattern::parse("/users/{id}/orders/{order}").unwrap();
        let params = pattern.matches("/users/7/orders/99/").unwrap();
        assert_eq!(params["id"], "7");
        assert_eq!(params["order"], "99");

        assert!(pattern.matches("/users/7/orders").is_none());
        assert!(pattern.matches("/users/7/orders/99/extra").is_none());
        assert!(pattern.matches("/Users/7/orders/99").is_none());
    }

    #[test]
    fn test_root() {
        let pattern = PathPattern::parse("/").unwrap();
        assert!(pattern.matches("/").unwrap().is_empty());
        assert!(pattern.matches("/x").is_none());
    }

    #[test]
    fn test_specificity() {
        let literal = PathPattern::parse("/users/me").unwrap();
        let param = PathPattern::parse("/users/{id}").unwrap();
        assert!(literal.specificity() > param.specificity());
    }
}
