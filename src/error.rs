//! Error types for the feedgate client library.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::entity::Entity;

/// The main error type for all feedgate operations.
#[derive(Error, Debug)]
pub enum FeedError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request with middleware failed
    #[error("HTTP request failed: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// The estimated admission wait exceeded the caller's patience
    #[error("admission wait of {wait:?} exceeds the configured patience")]
    AdmissionTimeout {
        /// Estimated time until a permit becomes available
        wait: Duration,
    },

    /// All retry attempts were exhausted while the entity kept cooling down
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded {
        /// Suggested wait before the caller retries, if known
        retry_after: Option<Duration>,
    },

    /// The entity is degraded and the cache holds no value for this key
    #[error("entity {entity} is degraded and no cached value exists")]
    DegradedNoCache {
        /// Entity the fetch resolved to
        entity: Entity,
    },

    /// Non-429 4xx/5xx from the provider
    #[error("upstream returned HTTP {status}: {body}")]
    Upstream {
        /// HTTP status code
        status: u16,
        /// Response body, truncated for diagnostics
        body: String,
    },

    /// Network-level timeout
    #[error("upstream request timed out")]
    TransportTimeout,

    /// Missing required credentials
    #[error("missing credentials: an API token is required")]
    MissingCredentials,

    /// An error observed through a coalesced in-flight request
    #[error("{0}")]
    Shared(Arc<FeedError>),
}

impl FeedError {
    /// The underlying error, unwrapping any coalescing indirection.
    pub fn root(&self) -> &FeedError {
        match self {
            FeedError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Whether the orchestrator may retry after this error.
    ///
    /// 429 handling has its own cooldown path; this classifies everything
    /// else. Configuration problems and client-side bugs are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Upstream { status, .. } => *status >= 500,
            FeedError::TransportTimeout => true,
            FeedError::Http(e) => e.is_timeout() || e.is_connect(),
            FeedError::HttpMiddleware(e) => match e {
                reqwest_middleware::Error::Reqwest(e) => e.is_timeout() || e.is_connect(),
                reqwest_middleware::Error::Middleware(_) => false,
            },
            _ => false,
        }
    }
}

/// Maximum number of body bytes carried in an [`FeedError::Upstream`].
pub(crate) const ERROR_BODY_LIMIT: usize = 512;

/// Truncate an upstream body for inclusion in error diagnostics.
pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut end = text.len().min(ERROR_BODY_LIMIT);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_retryability_splits_on_status() {
        let server_side = FeedError::Upstream {
            status: 503,
            body: String::new(),
        };
        let client_side = FeedError::Upstream {
            status: 404,
            body: String::new(),
        };
        assert!(server_side.is_retryable());
        assert!(!client_side.is_retryable());
    }

    #[test]
    fn test_missing_credentials_is_terminal() {
        assert!(!FeedError::MissingCredentials.is_retryable());
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "ü".repeat(ERROR_BODY_LIMIT);
        let truncated = truncate_body(body.as_bytes());
        assert!(truncated.len() <= ERROR_BODY_LIMIT);
        assert!(truncated.chars().all(|c| c == 'ü'));
    }
}
