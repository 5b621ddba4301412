//! The admission controller.
//!
//! [`RateLimitManager`] owns every [`EntityQuotaState`] and the in-flight
//! request registry, all behind one `tokio::sync::Mutex`. The lock is held
//! only for in-memory check/update, never across an upstream call or a
//! sleep, so admission order is simply lock-acquisition order.
//!
//! Entity states are created lazily on first reference and live for the
//! process lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::state::EntityQuotaState;
use super::{AlertThresholds, BackoffConfig, QuotaConfig, QuotaSnapshot};
use crate::entity::Entity;
use crate::error::FeedError;

/// Outcome shared between coalesced callers.
pub type FetchOutcome = std::result::Result<Arc<Value>, Arc<FeedError>>;

/// A cloneable handle to an in-flight fetch.
pub type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct ManagerState {
    entities: HashMap<Entity, EntityQuotaState>,
    in_flight: HashMap<String, SharedFetch>,
}

/// Entity-scoped admission controller and in-flight registry.
pub struct RateLimitManager {
    quota: QuotaConfig,
    backoff: BackoffConfig,
    thresholds: AlertThresholds,
    inner: Mutex<ManagerState>,
}

impl RateLimitManager {
    /// Create a manager with explicit tuning.
    pub fn new(quota: QuotaConfig, backoff: BackoffConfig, thresholds: AlertThresholds) -> Self {
        Self {
            quota,
            backoff,
            thresholds,
            inner: Mutex::new(ManagerState {
                entities: HashMap::new(),
                in_flight: HashMap::new(),
            }),
        }
    }

    /// Create a manager with the provider's default contract (3000/hour).
    pub fn with_defaults() -> Self {
        Self::new(
            QuotaConfig::default(),
            BackoffConfig::default(),
            AlertThresholds::default(),
        )
    }

    /// Ask for permission to make one upstream call for `entity`.
    ///
    /// `Ok(())` means a permit was consumed and the call should proceed now.
    /// `Err(wait)` means no permit is available: either the entity is in
    /// cooldown (the remaining cooldown is returned) or both admission gates
    /// are exhausted (an estimate until the next permit is returned).
    pub async fn acquire(&self, entity: Entity) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let state = self.entity_state(&mut inner, entity);

        if let Some(remaining) = state.cooldown_remaining(now) {
            return Err(remaining);
        }
        if state.try_consume(now) {
            state.update_degrade(now);
            Ok(())
        } else {
            let wait = state.estimate_wait(now);
            tracing::debug!(entity = %entity, wait_secs = wait.as_secs_f64(), "admission rejected");
            Err(wait)
        }
    }

    /// Fold quota metadata from a successful response into entity state.
    pub async fn observe_response(&self, entity: Entity, snapshot: &QuotaSnapshot) {
        if snapshot.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        self.entity_state(&mut inner, entity).observe_quota(
            snapshot.remaining,
            snapshot.limit,
            snapshot.reset_after,
            now,
        );
    }

    /// Register a 429 and put the entity into cooldown.
    ///
    /// Returns the cooldown duration so the caller can sleep exactly that
    /// long before retrying.
    pub async fn handle_429(&self, entity: Entity, snapshot: &QuotaSnapshot) -> Duration {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        self.entity_state(&mut inner, entity).register_429(
            snapshot.retry_after,
            snapshot.reset_after,
            &self.backoff,
            now,
        )
    }

    /// Whether the entity is currently in degrade mode.
    pub async fn is_degraded(&self, entity: Entity) -> bool {
        let mut inner = self.inner.lock().await;
        self.entity_state(&mut inner, entity).degraded
    }

    /// Count a cache hit for the entity.
    pub async fn record_cache_hit(&self, entity: Entity) {
        let mut inner = self.inner.lock().await;
        self.entity_state(&mut inner, entity).cache_hits += 1;
    }

    /// Count a cache miss for the entity.
    pub async fn record_cache_miss(&self, entity: Entity) {
        let mut inner = self.inner.lock().await;
        self.entity_state(&mut inner, entity).cache_misses += 1;
    }

    /// Snapshot metrics for one entity, or for every entity seen so far.
    pub async fn metrics(&self, entity: Option<Entity>) -> Vec<EntityMetrics> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        match entity {
            Some(entity) => {
                vec![EntityMetrics::collect(self.entity_state(&mut inner, entity), now)]
            }
            None => {
                let mut all: Vec<_> = inner
                    .entities
                    .values_mut()
                    .map(|state| EntityMetrics::collect(state, now))
                    .collect();
                all.sort_by_key(|m| m.entity);
                all
            }
        }
    }

    /// Evaluate the alert thresholds over every entity seen so far.
    pub async fn check_alerts(&self) -> Vec<Alert> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let mut alerts = Vec::new();

        for state in inner.entities.values_mut() {
            let entity = state.entity.as_str();

            if let Some(remaining) = state.remote_remaining {
                if remaining < self.thresholds.critical_remaining {
                    alerts.push(Alert {
                        level: AlertLevel::Critical,
                        entity,
                        message: format!("remaining quota critically low: {remaining}"),
                    });
                } else if remaining < self.thresholds.low_remaining {
                    alerts.push(Alert {
                        level: AlertLevel::Warning,
                        entity,
                        message: format!("remaining quota low: {remaining}"),
                    });
                }
            }

            let recent_429 = state.recent_429_count(now);
            if recent_429 > self.thresholds.max_429_per_minute {
                alerts.push(Alert {
                    level: AlertLevel::Warning,
                    entity,
                    message: format!("{recent_429} throttling responses in the last minute"),
                });
            }

            if state.cache_samples() > self.thresholds.min_cache_samples {
                if let Some(rate) = state.cache_hit_rate() {
                    if rate < self.thresholds.min_cache_hit_rate {
                        alerts.push(Alert {
                            level: AlertLevel::Warning,
                            entity,
                            message: format!(
                                "cache hit rate {rate:.2} over {} lookups",
                                state.cache_samples()
                            ),
                        });
                    }
                }
            }
        }
        alerts
    }

    /// Join an in-flight fetch with the same fingerprint, or register a new
    /// one built by `build`.
    ///
    /// Check and registration share one critical section, so two concurrent
    /// misses cannot both register. Returns the shared handle and whether
    /// this caller created it.
    pub async fn singleflight(
        &self,
        key: &str,
        build: impl FnOnce() -> SharedFetch,
    ) -> (SharedFetch, bool) {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.in_flight.get(key) {
            tracing::debug!(key, "joining in-flight request");
            return (existing.clone(), false);
        }
        let fetch = build();
        inner.in_flight.insert(key.to_string(), fetch.clone());
        (fetch, true)
    }

    /// Drop a completed in-flight entry.
    ///
    /// Called exactly once per registered fetch, after the shared task
    /// finishes, so later callers with the same fingerprint start a fresh
    /// attempt instead of replaying a stale outcome.
    pub async fn finish_flight(&self, key: &str) {
        self.inner.lock().await.in_flight.remove(key);
    }

    /// Number of registered in-flight fetches.
    pub async fn in_flight_count(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }

    fn entity_state<'a>(
        &self,
        inner: &'a mut ManagerState,
        entity: Entity,
    ) -> &'a mut EntityQuotaState {
        inner
            .entities
            .entry(entity)
            .or_insert_with(|| EntityQuotaState::new(entity, &self.quota))
    }
}

impl std::fmt::Debug for RateLimitManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitManager")
            .field("quota", &self.quota)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Severity of an [`Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Worth looking at.
    Warning,
    /// Quota exhaustion is imminent.
    Critical,
}

/// A threshold violation surfaced by [`RateLimitManager::check_alerts`].
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Severity.
    pub level: AlertLevel,
    /// Entity the alert concerns.
    pub entity: &'static str,
    /// Human-readable description.
    pub message: String,
}

/// Point-in-time observability snapshot for one entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityMetrics {
    /// Entity name.
    pub entity: &'static str,
    /// Tokens left in the bucket.
    pub tokens: u32,
    /// Current capacity (may have been adopted from the remote).
    pub capacity: u32,
    /// Admitted requests inside the rolling window.
    pub window_count: usize,
    /// Last remote remaining report.
    pub remote_remaining: Option<u32>,
    /// Last remote limit report.
    pub remote_limit: Option<u32>,
    /// Whether a cooldown is active.
    pub in_cooldown: bool,
    /// Seconds of cooldown left.
    pub cooldown_remaining_secs: Option<f64>,
    /// Whether degrade mode is active.
    pub degraded: bool,
    /// Admissions since process start.
    pub total_requests: u64,
    /// 429s since process start.
    pub total_429: u64,
    /// 429s in the trailing minute.
    pub recent_429: usize,
    /// Cache hits recorded.
    pub cache_hits: u64,
    /// Cache misses recorded.
    pub cache_misses: u64,
    /// Hit rate over recorded lookups.
    pub cache_hit_rate: Option<f64>,
}

impl EntityMetrics {
    fn collect(state: &mut EntityQuotaState, now: Instant) -> Self {
        let cooldown = state.cooldown_remaining(now);
        Self {
            entity: state.entity.as_str(),
            tokens: state.tokens,
            capacity: state.capacity,
            window_count: state.window_len(now),
            remote_remaining: state.remote_remaining,
            remote_limit: state.remote_limit,
            in_cooldown: cooldown.is_some(),
            cooldown_remaining_secs: cooldown.map(|d| d.as_secs_f64()),
            degraded: state.degraded,
            total_requests: state.total_requests,
            total_429: state.total_429,
            recent_429: state.recent_429_count(now),
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            cache_hit_rate: state.cache_hit_rate(),
        }
    }
}
