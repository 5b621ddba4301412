//! Per-entity quota state.
//!
//! One [`EntityQuotaState`] exists per [`Entity`], owned exclusively by the
//! [`RateLimitManager`](super::RateLimitManager). All methods take `&mut
//! self`; the manager serializes access behind its lock.
//!
//! Admission is dual-gated. The sliding window of admitted timestamps is the
//! authoritative hard cap: it never over-admits within the rolling window.
//! The token bucket smooths bursts on top of it; integer refill math alone
//! would allow short bursts past the true hourly cap, and the window alone
//! cannot express burst absorption.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::{BackoffConfig, QuotaConfig, jittered, limits};
use crate::entity::Entity;

/// What put an entity into cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownReason {
    /// The provider sent a `Retry-After` value.
    RetryAfter,
    /// Derived from the provider's reported reset time.
    ResetAt,
    /// Exponential backoff from repeated throttling.
    Backoff,
}

impl std::fmt::Display for CooldownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CooldownReason::RetryAfter => write!(f, "retry-after"),
            CooldownReason::ResetAt => write!(f, "reset-at"),
            CooldownReason::Backoff => write!(f, "backoff"),
        }
    }
}

/// Mutable quota record for one entity.
#[derive(Debug)]
pub struct EntityQuotaState {
    pub(crate) entity: Entity,
    pub(crate) capacity: u32,
    pub(crate) window: Duration,
    pub(crate) tokens: u32,
    pub(crate) last_refill: Instant,
    pub(crate) request_timestamps: VecDeque<Instant>,
    pub(crate) remote_remaining: Option<u32>,
    pub(crate) remote_limit: Option<u32>,
    pub(crate) remote_reset_at: Option<Instant>,
    pub(crate) cooldown_until: Option<Instant>,
    pub(crate) cooldown_reason: Option<CooldownReason>,
    pub(crate) degraded: bool,
    pub(crate) degraded_at: Option<Instant>,
    pub(crate) total_requests: u64,
    pub(crate) total_429: u64,
    pub(crate) cache_hits: u64,
    pub(crate) cache_misses: u64,
    pub(crate) recent_429: VecDeque<Instant>,
}

impl EntityQuotaState {
    /// Create a fresh state with a full bucket and an empty window.
    pub fn new(entity: Entity, config: &QuotaConfig) -> Self {
        Self {
            entity,
            capacity: config.capacity,
            window: config.window,
            tokens: config.capacity,
            last_refill: Instant::now(),
            request_timestamps: VecDeque::new(),
            remote_remaining: None,
            remote_limit: None,
            remote_reset_at: None,
            cooldown_until: None,
            cooldown_reason: None,
            degraded: false,
            degraded_at: None,
            total_requests: 0,
            total_429: 0,
            cache_hits: 0,
            cache_misses: 0,
            recent_429: VecDeque::new(),
        }
    }

    /// Top up the bucket from elapsed time.
    ///
    /// `last_refill` only advances when at least one whole token was added,
    /// so fractional accumulation is carried instead of silently dropped on
    /// every call.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned =
            (elapsed.as_secs_f64() / self.window.as_secs_f64() * f64::from(self.capacity)).floor();
        if earned >= 1.0 {
            let earned = if earned >= f64::from(u32::MAX) {
                u32::MAX
            } else {
                earned as u32
            };
            self.tokens = self.tokens.saturating_add(earned).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Drop window entries that have aged out.
    fn prune_window(&mut self, now: Instant) {
        while let Some(oldest) = self.request_timestamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.request_timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Attempt to admit one request.
    ///
    /// Both gates must pass: the window count stays below `capacity` and the
    /// bucket holds a token. On admission the token is spent and `now` joins
    /// the window; a rejection mutates nothing.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.prune_window(now);

        let admitted =
            (self.request_timestamps.len() as u32) < self.capacity && self.tokens > 0;
        if admitted {
            self.tokens -= 1;
            self.request_timestamps.push_back(now);
            self.total_requests += 1;
        }
        admitted
    }

    /// Fold a remote quota report into local state.
    ///
    /// Remote truth wins downwards: a lower remote `remaining` clamps the
    /// bucket, correcting for requests this process did not originate. A
    /// differing remote `limit` replaces the configured capacity.
    pub fn observe_quota(
        &mut self,
        remaining: Option<u32>,
        limit: Option<u32>,
        reset_after: Option<Duration>,
        now: Instant,
    ) {
        if let Some(limit) = limit {
            if limit != self.capacity && limit > 0 {
                tracing::info!(
                    entity = %self.entity,
                    old = self.capacity,
                    new = limit,
                    "adopting remote quota limit"
                );
                self.capacity = limit;
                self.tokens = self.tokens.min(limit);
            }
            self.remote_limit = Some(limit);
        }
        if let Some(remaining) = remaining {
            self.remote_remaining = Some(remaining);
            if remaining < self.tokens {
                self.tokens = remaining;
            }
        }
        if let Some(reset_after) = reset_after {
            self.remote_reset_at = Some(now + reset_after);
        }
        self.update_degrade(now);
    }

    /// Re-evaluate the degrade flag against the hysteresis thresholds.
    ///
    /// Enters below `DEGRADE_ENTER_REMAINING`, exits only at or above
    /// `DEGRADE_EXIT_REMAINING`; anything between leaves the flag unchanged.
    pub fn update_degrade(&mut self, now: Instant) {
        let Some(remaining) = self.remote_remaining else {
            return;
        };

        if !self.degraded && remaining < limits::DEGRADE_ENTER_REMAINING {
            self.degraded = true;
            self.degraded_at = Some(now);
            tracing::warn!(
                entity = %self.entity,
                remaining,
                "entering degrade mode, callers should prefer cache"
            );
        } else if self.degraded && remaining >= limits::DEGRADE_EXIT_REMAINING {
            self.degraded = false;
            self.degraded_at = None;
            tracing::info!(entity = %self.entity, remaining, "exiting degrade mode");
        }
    }

    /// Remaining cooldown, if any.
    ///
    /// Read-with-side-effect: an expired deadline is cleared here, so no
    /// timer is needed to leave cooldown.
    pub fn cooldown_remaining(&mut self, now: Instant) -> Option<Duration> {
        match self.cooldown_until {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                tracing::debug!(entity = %self.entity, "cooldown expired");
                self.cooldown_until = None;
                self.cooldown_reason = None;
                None
            }
            None => None,
        }
    }

    /// Register a 429 and enter cooldown.
    ///
    /// Duration source precedence: `Retry-After`, then the reported reset
    /// time, then exponential backoff on the running 429 count. Uniform
    /// jitter in `[0, jitter × duration]` is applied to whichever source won.
    pub fn register_429(
        &mut self,
        retry_after: Option<Duration>,
        reset_after: Option<Duration>,
        backoff: &BackoffConfig,
        now: Instant,
    ) -> Duration {
        let (base, reason) = if let Some(retry_after) = retry_after {
            (retry_after, CooldownReason::RetryAfter)
        } else if let Some(reset_after) = reset_after {
            (reset_after, CooldownReason::ResetAt)
        } else {
            let exponent = self.total_429.min(u64::from(limits::MAX_BACKOFF_EXPONENT)) as u32;
            let raw = backoff.base_delay.as_secs_f64() * backoff.factor.powi(exponent as i32);
            (
                Duration::from_secs_f64(raw.min(backoff.max_delay.as_secs_f64())),
                CooldownReason::Backoff,
            )
        };

        self.total_429 += 1;
        self.recent_429.push_back(now);
        self.prune_recent_429(now);

        let duration = jittered(base, backoff.jitter);
        self.cooldown_until = Some(now + duration);
        self.cooldown_reason = Some(reason);
        tracing::warn!(
            entity = %self.entity,
            reason = %reason,
            cooldown_secs = duration.as_secs_f64(),
            total_429 = self.total_429,
            "throttled by upstream, entering cooldown"
        );
        duration
    }

    /// Estimate how long a rejected caller should wait.
    ///
    /// Prefers the age-out time of the oldest window entry, then the remote
    /// reset, then the average per-request interval as a last resort.
    pub fn estimate_wait(&mut self, now: Instant) -> Duration {
        self.prune_window(now);
        let buffer = Duration::from_millis(limits::WAIT_BUFFER_MS);

        if let Some(oldest) = self.request_timestamps.front() {
            let age = now.saturating_duration_since(*oldest);
            return (self.window.saturating_sub(age) + buffer).min(self.window);
        }
        if let Some(reset_at) = self.remote_reset_at {
            if reset_at > now {
                return reset_at - now;
            }
        }
        self.window / self.capacity.max(1)
    }

    /// Drop 429 markers older than the trailing accounting window.
    fn prune_recent_429(&mut self, now: Instant) {
        let horizon = Duration::from_secs(limits::RECENT_429_WINDOW_SECS);
        while let Some(oldest) = self.recent_429.front() {
            if now.saturating_duration_since(*oldest) >= horizon {
                self.recent_429.pop_front();
            } else {
                break;
            }
        }
    }

    /// 429s observed in the trailing minute.
    pub fn recent_429_count(&mut self, now: Instant) -> usize {
        self.prune_recent_429(now);
        self.recent_429.len()
    }

    /// Admitted requests currently inside the window.
    pub fn window_len(&mut self, now: Instant) -> usize {
        self.prune_window(now);
        self.request_timestamps.len()
    }

    /// Cache hit rate over all recorded lookups, if any were recorded.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let samples = self.cache_hits + self.cache_misses;
        if samples == 0 {
            return None;
        }
        Some(self.cache_hits as f64 / samples as f64)
    }

    /// Total recorded cache lookups.
    pub fn cache_samples(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }
}
