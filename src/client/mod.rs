//! The caller-facing fetch orchestrator.
//!
//! [`FeedClient`] ties the pieces together for each logical fetch: resolve
//! the entity from the path, serve from cache where possible, coalesce
//! concurrent identical fetches into one upstream call, ask the
//! [`RateLimitManager`] for admission, perform the call through the
//! [`Transport`] seam, feed quota metadata back, and write the payload
//! through to the cache with the entity's TTL.
//!
//! The retry loop lives here too: 429s sleep out the cooldown the manager
//! chose, 5xx and timeouts back off exponentially with jitter, and
//! everything is bounded by one attempt budget.
//!
//! # Example
//!
//! ```rust,no_run
//! use feedgate::FeedClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FeedClient::builder()
//!         .base_url("https://api.example.com/v3")
//!         .api_token(std::env::var("FEED_API_TOKEN")?)
//!         .build();
//!
//!     let fixtures = client.fetch("/fixtures/date/2026-08-07", &[]).await?;
//!     println!("{fixtures}");
//!     Ok(())
//! }
//! ```

mod request;

pub use request::FetchRequest;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use url::Url;

use crate::cache::{Cache, InMemoryCache};
use crate::entity::Entity;
use crate::error::{FeedError, truncate_body};
use crate::rate_limit::{
    AlertThresholds, BackoffConfig, QuotaConfig, QuotaSnapshot, RateLimitManager,
};
use crate::Result;

/// A raw response from the upstream provider.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

/// Executes raw upstream requests.
///
/// The orchestrator is generic over this seam so the admission, caching and
/// coalescing logic can be exercised against programmable transports in
/// tests. [`HttpTransport`] is the production implementation.
pub trait Transport: Send + Sync + 'static {
    /// Perform one upstream request.
    fn execute(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<UpstreamResponse>> + Send;
}

/// HTTPS transport over `reqwest` with tracing middleware.
pub struct HttpTransport {
    http: ClientWithMiddleware,
    base_url: String,
    api_token: Option<SecretString>,
}

impl HttpTransport {
    /// Build a transport for a base URL.
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<SecretString>,
        timeout: Duration,
        user_agent: Option<String>,
    ) -> Self {
        let mut headers = HeaderMap::new();
        let user_agent =
            user_agent.unwrap_or_else(|| format!("feedgate/{}", env!("CARGO_PKG_VERSION")));
        let header_value = HeaderValue::from_str(&user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("feedgate"));
        headers.insert(USER_AGENT, header_value);

        let reqwest_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let http = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        Self {
            http,
            base_url: base_url.into(),
            api_token,
        }
    }
}

impl Transport for HttpTransport {
    async fn execute(&self, request: &FetchRequest) -> Result<UpstreamResponse> {
        let token = self.api_token.as_ref().ok_or(FeedError::MissingCredentials)?;
        let auth = HeaderValue::from_str(token.expose_secret())
            .map_err(|_| FeedError::MissingCredentials)?;

        let mut raw = format!("{}{}", self.base_url, request.path());
        let query = request.canonical_query();
        if !query.is_empty() {
            raw.push('?');
            raw.push_str(&query);
        }
        let url = Url::parse(&raw)?;

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| match e {
                reqwest_middleware::Error::Reqwest(e) if e.is_timeout() => {
                    FeedError::TransportTimeout
                }
                other => FeedError::from(other),
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FeedError::TransportTimeout
                } else {
                    FeedError::from(e)
                }
            })?
            .to_vec();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("has_credentials", &self.api_token.is_some())
            .finish()
    }
}

struct FeedCore<T, C> {
    transport: T,
    cache: Option<C>,
    manager: RateLimitManager,
    namespace: String,
    max_attempts: u32,
    admission_patience: Duration,
    backoff: BackoffConfig,
}

/// Admission-controlled, cache-aside client for a metered data API.
///
/// Cheap to clone; clones share the same quota state, cache and in-flight
/// registry.
pub struct FeedClient<T = HttpTransport, C = InMemoryCache> {
    core: Arc<FeedCore<T, C>>,
}

impl<T, C> Clone for FeedClient<T, C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl FeedClient {
    /// Create a new client builder.
    pub fn builder() -> FeedClientBuilder {
        FeedClientBuilder::new()
    }
}

impl<T, C> FeedClient<T, C>
where
    T: Transport,
    C: Cache + 'static,
{
    /// Fetch a logical resource.
    ///
    /// Serves from cache when possible; otherwise coalesces with any
    /// identical in-flight fetch, acquires admission and calls upstream.
    /// While the entity is degraded only the cache is consulted and a miss
    /// is [`FeedError::DegradedNoCache`].
    pub async fn fetch(&self, path: &str, params: &[(&str, &str)]) -> Result<Arc<Value>> {
        let request = FetchRequest::new(path, params);
        let entity = Entity::resolve(path);
        let cache_key = request.cache_key(&self.core.namespace, entity);

        if self.core.manager.is_degraded(entity).await {
            return match self.core.cache_get(&cache_key).await {
                Some(value) => {
                    self.core.manager.record_cache_hit(entity).await;
                    Ok(Arc::new(value))
                }
                None => {
                    self.core.manager.record_cache_miss(entity).await;
                    Err(FeedError::DegradedNoCache { entity })
                }
            };
        }

        if let Some(value) = self.core.cache_get(&cache_key).await {
            self.core.manager.record_cache_hit(entity).await;
            return Ok(Arc::new(value));
        }
        self.core.manager.record_cache_miss(entity).await;

        let fingerprint = request.fingerprint();
        let core = Arc::clone(&self.core);
        let flight_key = fingerprint.clone();
        let (shared, created) = self
            .core
            .manager
            .singleflight(&fingerprint, move || {
                async move {
                    let result = core.fetch_upstream(entity, &request, &cache_key).await;
                    core.manager.finish_flight(&flight_key).await;
                    result.map(Arc::new).map_err(Arc::new)
                }
                .boxed()
                .shared()
            })
            .await;
        if created {
            // The registered task drives itself to completion even if every
            // caller is cancelled, so the registry entry always clears.
            tokio::spawn(shared.clone());
        }

        shared
            .await
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(FeedError::Shared))
    }

    /// Drop the cached value for a logical resource, if any.
    pub async fn invalidate(&self, path: &str, params: &[(&str, &str)]) {
        let request = FetchRequest::new(path, params);
        let entity = Entity::resolve(path);
        let cache_key = request.cache_key(&self.core.namespace, entity);
        if let Some(cache) = self.core.cache.as_ref() {
            if let Err(e) = cache.delete(&cache_key).await {
                tracing::debug!("cache delete failed: {e}");
            }
        }
    }

    /// The admission controller, for metrics and alert scraping.
    pub fn manager(&self) -> &RateLimitManager {
        &self.core.manager
    }
}

impl<T, C> FeedCore<T, C>
where
    T: Transport,
    C: Cache + 'static,
{
    async fn fetch_upstream(
        &self,
        entity: Entity,
        request: &FetchRequest,
        cache_key: &str,
    ) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.admit(entity).await?;

            match self.transport.execute(request).await {
                Ok(response) if response.status == StatusCode::TOO_MANY_REQUESTS => {
                    let snapshot = QuotaSnapshot::from_throttle(&response.headers, &response.body);
                    let cooldown = self.manager.handle_429(entity, &snapshot).await;
                    if attempt >= self.max_attempts {
                        return Err(FeedError::RateLimitExceeded {
                            retry_after: Some(cooldown),
                        });
                    }
                    tokio::time::sleep(cooldown).await;
                }
                Ok(response) if !response.status.is_success() => {
                    let error = FeedError::Upstream {
                        status: response.status.as_u16(),
                        body: truncate_body(&response.body),
                    };
                    if attempt >= self.max_attempts || !error.is_retryable() {
                        return Err(error);
                    }
                    let delay = self.backoff.delay_for(attempt - 1);
                    tracing::debug!(
                        entity = %entity,
                        status = response.status.as_u16(),
                        delay_secs = delay.as_secs_f64(),
                        "upstream error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => {
                    let payload: Value = if response.body.is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_slice(&response.body)?
                    };
                    let snapshot = QuotaSnapshot::from_success(&response.headers, &payload);
                    self.manager.observe_response(entity, &snapshot).await;
                    self.cache_set(cache_key, &payload, entity.cache_ttl()).await;
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt >= self.max_attempts || !error.is_retryable() {
                        return Err(error);
                    }
                    let delay = self.backoff.delay_for(attempt - 1);
                    tracing::debug!(
                        entity = %entity,
                        error = %error,
                        delay_secs = delay.as_secs_f64(),
                        "transport error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Acquire admission, sleeping out one suggested wait if needed.
    async fn admit(&self, entity: Entity) -> Result<()> {
        match self.manager.acquire(entity).await {
            Ok(()) => Ok(()),
            Err(wait) if wait > self.admission_patience => {
                Err(FeedError::AdmissionTimeout { wait })
            }
            Err(wait) => {
                tokio::time::sleep(wait).await;
                self.manager
                    .acquire(entity)
                    .await
                    .map_err(|wait| FeedError::AdmissionTimeout { wait })
            }
        }
    }

    async fn cache_get(&self, key: &str) -> Option<Value> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("cache get failed, treating as miss: {e}");
                None
            }
        }
    }

    async fn cache_set(&self, key: &str, value: &Value, ttl: Duration) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(e) = cache.set(key, value, ttl).await {
            tracing::debug!("cache set failed: {e}");
        }
    }
}

/// Builder for [`FeedClient`].
pub struct FeedClientBuilder {
    base_url: String,
    api_token: Option<SecretString>,
    user_agent: Option<String>,
    timeout: Duration,
    max_attempts: u32,
    admission_patience: Duration,
    namespace: String,
    quota: QuotaConfig,
    backoff: BackoffConfig,
    thresholds: AlertThresholds,
    cache_enabled: bool,
}

impl FeedClientBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            base_url: String::new(),
            api_token: None,
            user_agent: None,
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            admission_patience: Duration::from_secs(30),
            namespace: "feedgate".to_string(),
            quota: QuotaConfig::default(),
            backoff: BackoffConfig::default(),
            thresholds: AlertThresholds::default(),
            cache_enabled: true,
        }
    }

    /// Set the provider base URL (useful for testing with a mock server).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the API token sent on every request.
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(SecretString::from(token.into()));
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the per-request network timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the attempt budget for one logical fetch.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the longest admission wait a fetch will sleep out.
    pub fn admission_patience(mut self, patience: Duration) -> Self {
        self.admission_patience = patience;
        self
    }

    /// Set the cache key namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Override the quota contract.
    pub fn quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = quota;
        self
    }

    /// Override backoff tuning.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override alerting thresholds.
    pub fn alert_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Run without any cache; every fetch goes upstream.
    pub fn no_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Build a client over HTTPS with the bundled in-memory cache.
    pub fn build(self) -> FeedClient {
        let cache = self.cache_enabled.then(InMemoryCache::new);
        let transport = HttpTransport::new(
            self.base_url.clone(),
            self.api_token.clone(),
            self.timeout,
            self.user_agent.clone(),
        );
        self.build_with(transport, cache)
    }

    /// Build a client over a custom transport and cache.
    pub fn build_with<T, C>(self, transport: T, cache: Option<C>) -> FeedClient<T, C>
    where
        T: Transport,
        C: Cache + 'static,
    {
        FeedClient {
            core: Arc::new(FeedCore {
                transport,
                cache,
                manager: RateLimitManager::new(
                    self.quota,
                    self.backoff.clone(),
                    self.thresholds,
                ),
                namespace: self.namespace,
                max_attempts: self.max_attempts,
                admission_patience: self.admission_patience,
                backoff: self.backoff,
            }),
        }
    }
}

impl Default for FeedClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    /// Transport serving a scripted queue of responses.
    struct FakeTransport {
        responses: Mutex<VecDeque<Result<UpstreamResponse>>>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl FakeTransport {
        fn new(responses: Vec<Result<UpstreamResponse>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    responses: Mutex::new(responses.into()),
                    calls: Arc::clone(&calls),
                    delay: Duration::ZERO,
                },
                calls,
            )
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl Transport for FakeTransport {
        async fn execute(&self, _request: &FetchRequest) -> Result<UpstreamResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok_response(json!({"data": []}), &[])))
        }
    }

    fn ok_response(body: Value, headers: &[(&'static str, &str)]) -> UpstreamResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        UpstreamResponse {
            status: StatusCode::OK,
            headers: map,
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    fn status_response(status: u16, headers: &[(&'static str, &str)]) -> UpstreamResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        UpstreamResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: map,
            body: Vec::new(),
        }
    }

    fn client_over(
        transport: FakeTransport,
    ) -> FeedClient<FakeTransport, InMemoryCache> {
        FeedClient::builder()
            .backoff(BackoffConfig {
                jitter: 0.0,
                ..BackoffConfig::default()
            })
            .build_with(transport, Some(InMemoryCache::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_aside_roundtrip() {
        let (transport, calls) =
            FakeTransport::new(vec![Ok(ok_response(json!({"data": [1, 2]}), &[]))]);
        let client = client_over(transport);

        let first = client.fetch("/teams/42", &[]).await.unwrap();
        let second = client.fetch("/teams/42", &[]).await.unwrap();

        assert_eq!(*first, json!({"data": [1, 2]}));
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = client.manager().metrics(Some(Entity::Teams)).await;
        assert_eq!(metrics[0].cache_hits, 1);
        assert_eq!(metrics[0].cache_misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_entity_refetches_after_ttl() {
        let (transport, calls) = FakeTransport::new(vec![]);
        let client = client_over(transport);

        client.fetch("/livescores/inplay", &[]).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        client.fetch("/livescores/inplay", &[]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        client.fetch("/livescores/inplay", &[]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_fetches_coalesce() {
        let (transport, calls) = FakeTransport::new(vec![]);
        let transport = transport.with_delay(Duration::from_millis(50));
        let client = client_over(transport);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.fetch("/odds/fixture/9", &[("page", "1")]).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(client.manager().in_flight_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_fingerprints_do_not_coalesce() {
        let (transport, calls) = FakeTransport::new(vec![]);
        let client = client_over(transport);

        client.fetch("/odds/fixture/9", &[("page", "1")]).await.unwrap();
        client.fetch("/odds/fixture/9", &[("page", "2")]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_then_success() {
        let (transport, calls) = FakeTransport::new(vec![
            Ok(status_response(429, &[("retry-after", "2")])),
            Ok(ok_response(json!({"data": "ok"}), &[])),
        ]);
        let client = client_over(transport);

        let value = client.fetch("/fixtures/today", &[]).await.unwrap();
        assert_eq!(*value, json!({"data": "ok"}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let metrics = client.manager().metrics(Some(Entity::Fixtures)).await;
        assert_eq!(metrics[0].total_429, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_throttling_exhausts_attempts() {
        let (transport, calls) = FakeTransport::new(vec![
            Ok(status_response(429, &[("retry-after", "1")])),
            Ok(status_response(429, &[("retry-after", "1")])),
            Ok(status_response(429, &[("retry-after", "1")])),
        ]);
        let client = client_over(transport);

        let error = client.fetch("/fixtures/today", &[]).await.unwrap_err();
        assert!(matches!(
            error.root(),
            FeedError::RateLimitExceeded { retry_after: Some(_) }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_entity_is_cache_only() {
        let (transport, calls) = FakeTransport::new(vec![Ok(ok_response(
            json!({"data": [], "rate_limit": {"remaining": 150, "limit": 3000}}),
            &[],
        ))]);
        let client = client_over(transport);

        // The fetch succeeds and its quota report flips the entity into
        // degrade mode.
        client.fetch("/standings/season/2026", &[]).await.unwrap();
        assert!(client.manager().is_degraded(Entity::Standings).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Cached key still serves.
        client.fetch("/standings/season/2026", &[]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Uncached key fails fast without an upstream call.
        let error = client.fetch("/standings/season/2025", &[]).await.unwrap_err();
        assert!(matches!(
            error.root(),
            FeedError::DegradedNoCache {
                entity: Entity::Standings
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retry_then_surface() {
        let (transport, calls) = FakeTransport::new(vec![
            Ok(status_response(503, &[])),
            Ok(status_response(503, &[])),
            Ok(status_response(503, &[])),
        ]);
        let client = client_over(transport);

        let error = client.fetch("/leagues", &[]).await.unwrap_err();
        assert!(matches!(
            error.root(),
            FeedError::Upstream { status: 503, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_recovers_mid_budget() {
        let (transport, calls) = FakeTransport::new(vec![
            Ok(status_response(500, &[])),
            Ok(ok_response(json!({"data": 1}), &[])),
        ]);
        let client = client_over(transport);

        client.fetch("/leagues", &[]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let (transport, calls) = FakeTransport::new(vec![Ok(status_response(404, &[]))]);
        let client = client_over(transport);

        let error = client.fetch("/leagues/999", &[]).await.unwrap_err();
        assert!(matches!(
            error.root(),
            FeedError::Upstream { status: 404, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried() {
        let (transport, calls) = FakeTransport::new(vec![
            Err(FeedError::TransportTimeout),
            Ok(ok_response(json!({"data": 1}), &[])),
        ]);
        let client = client_over(transport);

        client.fetch("/venues", &[]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credentials_fail_fast() {
        let (transport, calls) = FakeTransport::new(vec![Err(FeedError::MissingCredentials)]);
        let client = client_over(transport);

        let error = client.fetch("/venues", &[]).await.unwrap_err();
        assert!(matches!(error.root(), FeedError::MissingCredentials));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_body_means_no_data() {
        let (transport, _) = FakeTransport::new(vec![Ok(UpstreamResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        })]);
        let client = client_over(transport);

        let value = client.fetch("/sidelined", &[]).await.unwrap();
        assert_eq!(*value, Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_headers_are_observed() {
        let (transport, _) = FakeTransport::new(vec![Ok(ok_response(
            json!({"data": []}),
            &[
                ("x-ratelimit-remaining", "1234"),
                ("x-ratelimit-limit", "3000"),
            ],
        ))]);
        let client = client_over(transport);

        client.fetch("/players/1", &[]).await.unwrap();
        let metrics = client.manager().metrics(Some(Entity::Players)).await;
        assert_eq!(metrics[0].remote_remaining, Some(1234));
        assert_eq!(metrics[0].remote_limit, Some(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cacheless_client_always_goes_upstream() {
        let (transport, calls) = FakeTransport::new(vec![]);
        let client: FeedClient<FakeTransport, InMemoryCache> = FeedClient::builder()
            .build_with(transport, None);

        client.fetch("/teams/1", &[]).await.unwrap();
        client.fetch("/teams/1", &[]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch() {
        let (transport, calls) = FakeTransport::new(vec![]);
        let client = client_over(transport);

        client.fetch("/teams/7", &[]).await.unwrap();
        client.invalidate("/teams/7", &[]).await;
        client.fetch("/teams/7", &[]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
