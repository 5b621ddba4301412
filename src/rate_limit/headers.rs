//! Quota metadata extraction from upstream responses.
//!
//! The provider reports quota state in three header spellings
//! (`X-RateLimit-*`, `X-Rate-Limit-*`, `RateLimit-*`), and sometimes in the
//! body instead: a 200 payload may carry a `rate_limit` object, and a 429
//! body may carry `{message, reset_code, reset_at|reset}`. Everything is
//! normalized into a [`QuotaSnapshot`] before it touches quota state.
//!
//! Reset values are ambiguous in the wild: small numbers mean "seconds from
//! now", large ones are absolute Unix timestamps. The split is made at
//! [`limits::RESET_ABSOLUTE_THRESHOLD`].

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use super::limits;

const REMAINING_HEADERS: [&str; 3] = [
    "x-ratelimit-remaining",
    "x-rate-limit-remaining",
    "ratelimit-remaining",
];
const LIMIT_HEADERS: [&str; 3] = ["x-ratelimit-limit", "x-rate-limit-limit", "ratelimit-limit"];
const RESET_HEADERS: [&str; 3] = ["x-ratelimit-reset", "x-rate-limit-reset", "ratelimit-reset"];

/// Normalized quota metadata from one upstream response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Requests left in the remote window.
    pub remaining: Option<u32>,
    /// Remote window capacity.
    pub limit: Option<u32>,
    /// Time until the remote window resets.
    pub reset_after: Option<Duration>,
    /// `Retry-After` from a throttling response.
    pub retry_after: Option<Duration>,
}

impl QuotaSnapshot {
    /// Parse the rate-limit headers of a response.
    ///
    /// `HeaderMap` lookups are case-insensitive, so each spelling variant
    /// covers all its casings.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_number(headers, &REMAINING_HEADERS).map(clamp_u32),
            limit: header_number(headers, &LIMIT_HEADERS).map(clamp_u32),
            reset_after: header_number(headers, &RESET_HEADERS).map(reset_to_duration),
            retry_after: header_number(headers, &["retry-after"]).map(Duration::from_secs),
        }
    }

    /// Parse a successful response: headers plus the optional `rate_limit`
    /// object inside the payload. Body values fill gaps the headers left.
    pub fn from_success(headers: &HeaderMap, payload: &Value) -> Self {
        let mut snapshot = Self::from_headers(headers);
        if let Some(raw) = payload.get("rate_limit") {
            match serde_json::from_value::<RateLimitBody>(raw.clone()) {
                Ok(body) => snapshot.merge_rate_limit_body(&body),
                Err(e) => tracing::debug!("unparseable rate_limit body object: {e}"),
            }
        }
        snapshot
    }

    /// Parse a 429 response: headers plus the optional throttle body.
    pub fn from_throttle(headers: &HeaderMap, body: &[u8]) -> Self {
        let mut snapshot = Self::from_headers(headers);
        if let Ok(body) = serde_json::from_slice::<ThrottleBody>(body) {
            if snapshot.reset_after.is_none() {
                snapshot.reset_after = body.reset_at.map(reset_to_duration);
            }
            if let Some(message) = &body.message {
                tracing::debug!(message, "throttle response body");
            }
        }
        snapshot
    }

    /// Fill unset fields from a 200 body's `rate_limit` object.
    pub fn merge_rate_limit_body(&mut self, body: &RateLimitBody) {
        if self.remaining.is_none() {
            self.remaining = body.remaining;
        }
        if self.limit.is_none() {
            self.limit = body.limit;
        }
        if self.reset_after.is_none() {
            self.reset_after = body.reset_at.map(reset_to_duration);
        }
    }

    /// Whether the response carried no quota metadata at all.
    pub fn is_empty(&self) -> bool {
        self.remaining.is_none()
            && self.limit.is_none()
            && self.reset_after.is_none()
            && self.retry_after.is_none()
    }
}

/// `rate_limit` object embedded in successful payloads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitBody {
    /// Requests left in the remote window.
    pub remaining: Option<u32>,
    /// Remote window capacity.
    pub limit: Option<u32>,
    /// Reset moment, relative seconds or absolute Unix time.
    #[serde(alias = "reset")]
    pub reset_at: Option<u64>,
}

/// Body of a 429 response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThrottleBody {
    /// Human-readable throttle message.
    pub message: Option<String>,
    /// Provider-specific reset code.
    pub reset_code: Option<Value>,
    /// Reset moment, relative seconds or absolute Unix time.
    #[serde(alias = "reset")]
    pub reset_at: Option<u64>,
}

/// First parseable integer among the named headers.
fn header_number(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    })
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u64::from(u32::MAX)) as u32
}

/// Interpret a raw reset value as a duration from now.
pub(crate) fn reset_to_duration(raw: u64) -> Duration {
    if raw < limits::RESET_ABSOLUTE_THRESHOLD {
        return Duration::from_secs(raw);
    }
    let now = time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
    Duration::from_secs(raw.saturating_sub(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_parse_standard_spelling() {
        let snapshot = QuotaSnapshot::from_headers(&headers(&[
            ("x-ratelimit-remaining", "2500"),
            ("x-ratelimit-limit", "3000"),
            ("x-ratelimit-reset", "120"),
        ]));
        assert_eq!(snapshot.remaining, Some(2500));
        assert_eq!(snapshot.limit, Some(3000));
        assert_eq!(snapshot.reset_after, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_alternate_spellings() {
        let hyphenated =
            QuotaSnapshot::from_headers(&headers(&[("x-rate-limit-remaining", "10")]));
        assert_eq!(hyphenated.remaining, Some(10));

        let bare = QuotaSnapshot::from_headers(&headers(&[("ratelimit-remaining", "7")]));
        assert_eq!(bare.remaining, Some(7));
    }

    #[test]
    fn test_uppercase_header_names_resolve() {
        // HeaderMap normalizes lookup casing; mixed-case wire headers land
        // in the same slots.
        let mut map = HeaderMap::new();
        map.insert(
            "X-RateLimit-Remaining".parse::<HeaderName>().unwrap(),
            HeaderValue::from_static("42"),
        );
        let snapshot = QuotaSnapshot::from_headers(&map);
        assert_eq!(snapshot.remaining, Some(42));
    }

    #[test]
    fn test_retry_after_seconds() {
        let snapshot = QuotaSnapshot::from_headers(&headers(&[("retry-after", "30")]));
        assert_eq!(snapshot.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_small_reset_is_relative() {
        assert_eq!(reset_to_duration(90), Duration::from_secs(90));
        assert_eq!(reset_to_duration(999_999), Duration::from_secs(999_999));
    }

    #[test]
    fn test_large_reset_is_absolute_unix_time() {
        let now = time::OffsetDateTime::now_utc().unix_timestamp() as u64;
        let duration = reset_to_duration(now + 600);
        assert!(duration >= Duration::from_secs(598));
        assert!(duration <= Duration::from_secs(600));

        // A reset in the past collapses to zero rather than underflowing.
        assert_eq!(reset_to_duration(now.saturating_sub(600)), Duration::ZERO);
    }

    #[test]
    fn test_success_body_fills_header_gaps() {
        let payload = serde_json::json!({
            "data": [],
            "rate_limit": { "remaining": 1500, "limit": 3000, "reset": 300 }
        });
        let snapshot = QuotaSnapshot::from_success(
            &headers(&[("x-ratelimit-remaining", "1400")]),
            &payload,
        );
        // Headers win where both report.
        assert_eq!(snapshot.remaining, Some(1400));
        assert_eq!(snapshot.limit, Some(3000));
        assert_eq!(snapshot.reset_after, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_throttle_body_reset_alias() {
        let body = br#"{"message": "too many requests", "reset_code": 1, "reset_at": 45}"#;
        let snapshot = QuotaSnapshot::from_throttle(&HeaderMap::new(), body);
        assert_eq!(snapshot.reset_after, Some(Duration::from_secs(45)));
        assert_eq!(snapshot.retry_after, None);
    }

    #[test]
    fn test_garbage_values_are_ignored() {
        let snapshot = QuotaSnapshot::from_headers(&headers(&[
            ("x-ratelimit-remaining", "soon"),
            ("retry-after", "-2"),
        ]));
        assert!(snapshot.is_empty());
    }
}
