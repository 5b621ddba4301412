//! Canonical request identity.
//!
//! A logical fetch is identified by its path and query parameters. The
//! parameters are sorted once at construction so the same logical request
//! always produces the same canonical query string, the same cache key and
//! the same in-flight fingerprint, regardless of argument order at the call
//! site.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::entity::Entity;

/// A normalized upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    path: String,
    params: Vec<(String, String)>,
}

impl FetchRequest {
    /// Normalize a path and parameter set.
    ///
    /// The path is given a leading slash; parameters are sorted by key, then
    /// value.
    pub fn new(path: &str, params: &[(&str, &str)]) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let mut params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        params.sort();
        Self { path, params }
    }

    /// The normalized request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The sorted parameters.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Sorted parameters as a URL-encoded query string.
    pub fn canonical_query(&self) -> String {
        serde_urlencoded::to_string(&self.params).unwrap_or_default()
    }

    /// Cache key for this request under a namespace and entity.
    pub fn cache_key(&self, namespace: &str, entity: Entity) -> String {
        format!("{namespace}:{entity}:{}:{}", self.path, self.canonical_query())
    }

    /// Deterministic fingerprint used by the in-flight registry.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.path.as_bytes());
        hasher.update(b"?");
        hasher.update(self.canonical_query().as_bytes());
        let digest = hasher.finalize();
        digest.iter().fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_are_canonically_sorted() {
        let a = FetchRequest::new("/odds/fixture/9", &[("page", "2"), ("include", "markets")]);
        let b = FetchRequest::new("/odds/fixture/9", &[("include", "markets"), ("page", "2")]);
        assert_eq!(a, b);
        assert_eq!(a.canonical_query(), "include=markets&page=2");
    }

    #[test]
    fn test_path_gains_leading_slash() {
        let request = FetchRequest::new("teams/42", &[]);
        assert_eq!(request.path(), "/teams/42");
    }

    #[test]
    fn test_cache_key_format() {
        let request = FetchRequest::new("/livescores/inplay", &[("include", "scores")]);
        assert_eq!(
            request.cache_key("feedgate", Entity::Livescores),
            "feedgate:livescores:/livescores/inplay:include=scores"
        );
    }

    #[test]
    fn test_fingerprint_is_order_insensitive_and_distinct() {
        let a = FetchRequest::new("/fixtures", &[("date", "2026-08-07"), ("page", "1")]);
        let b = FetchRequest::new("/fixtures", &[("page", "1"), ("date", "2026-08-07")]);
        let c = FetchRequest::new("/fixtures", &[("page", "2"), ("date", "2026-08-07")]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_query_values_are_encoded() {
        let request = FetchRequest::new("/players", &[("search", "kerem aktürkoğlu")]);
        assert!(request.canonical_query().contains("search=kerem+akt"));
    }
}
