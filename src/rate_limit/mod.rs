//! Entity-scoped admission control for the metered upstream API.
//!
//! The provider enforces a hard quota per logical resource category (3000
//! requests per rolling hour by default). This module decides, per entity,
//! whether an upstream call may be made right now:
//!
//! - **Dual-gate admission**: an exact sliding window of admitted request
//!   timestamps is the source of truth for the hard cap; a token bucket
//!   layered on top smooths bursts. A request is admitted only when both
//!   gates pass.
//! - **Cooldown**: a 429 puts the entity into a timed cooldown derived from
//!   `Retry-After`, the reported reset time, or jittered exponential backoff.
//! - **Quota sync**: remaining/limit/reset metadata reported by the provider
//!   (headers or body) clamps the local state, correcting for requests made
//!   by other consumers of the same key.
//! - **Degrade mode**: a sticky, hysteresis-gated flag that tells callers to
//!   prefer cached data while the remaining budget is critically low.
//!
//! ## Example
//!
//! ```rust
//! use feedgate::rate_limit::RateLimitManager;
//! use feedgate::Entity;
//!
//! # tokio_test::block_on(async {
//! let manager = RateLimitManager::with_defaults();
//! match manager.acquire(Entity::Odds).await {
//!     Ok(()) => { /* spend the permit on an upstream call */ }
//!     Err(wait) => { /* sleep `wait`, then try again */ }
//! }
//! # });
//! ```

mod headers;
mod manager;
mod state;

pub use headers::{QuotaSnapshot, RateLimitBody, ThrottleBody};
pub use manager::{Alert, AlertLevel, EntityMetrics, FetchOutcome, RateLimitManager, SharedFetch};
pub use state::{CooldownReason, EntityQuotaState};

use std::time::Duration;

use rand::Rng as _;

/// Per-entity quota configuration.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Maximum admitted requests per window.
    pub capacity: u32,
    /// Length of the rolling quota window.
    pub window: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            capacity: limits::DEFAULT_CAPACITY,
            window: Duration::from_secs(limits::DEFAULT_WINDOW_SECS),
        }
    }
}

/// Backoff tuning for cooldowns and transient-error retries.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First backoff delay.
    pub base_delay: Duration,
    /// Ceiling for any computed delay.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub factor: f64,
    /// Upper bound of the uniform jitter, as a fraction of the delay.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            factor: 2.0,
            jitter: 0.3,
        }
    }
}

impl BackoffConfig {
    /// Exponential delay for the given attempt, jittered.
    ///
    /// The exponent is clamped so repeated failures saturate at
    /// `max_delay` instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(limits::MAX_BACKOFF_EXPONENT);
        let raw = self.base_delay.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        jittered(Duration::from_secs_f64(capped), self.jitter)
    }
}

/// Add uniform jitter in `[0, fraction × delay]` to a delay.
pub(crate) fn jittered(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 || delay.is_zero() {
        return delay;
    }
    let extra = rand::rng().random_range(0.0..=fraction);
    delay + delay.mul_f64(extra)
}

/// Alerting thresholds evaluated by [`RateLimitManager::check_alerts`].
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Remote remaining below this raises a warning.
    pub low_remaining: u32,
    /// Remote remaining below this raises a critical alert.
    pub critical_remaining: u32,
    /// More 429s than this in the trailing minute raises a warning.
    pub max_429_per_minute: usize,
    /// Cache hit rate below this raises a warning.
    pub min_cache_hit_rate: f64,
    /// Hit-rate alerting only starts past this many cache lookups.
    pub min_cache_samples: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            low_remaining: 500,
            critical_remaining: limits::DEGRADE_ENTER_REMAINING,
            max_429_per_minute: 10,
            min_cache_hit_rate: 0.5,
            min_cache_samples: 10,
        }
    }
}

/// Quota and admission constants.
pub mod limits {
    /// Default quota: requests per window.
    pub const DEFAULT_CAPACITY: u32 = 3000;
    /// Default quota window in seconds.
    pub const DEFAULT_WINDOW_SECS: u64 = 3600;

    /// Degrade mode engages below this remote remaining.
    pub const DEGRADE_ENTER_REMAINING: u32 = 200;
    /// Degrade mode disengages at or above this remote remaining.
    pub const DEGRADE_EXIT_REMAINING: u32 = 2 * DEGRADE_ENTER_REMAINING;

    /// Exponent clamp for repeated-429 backoff.
    pub const MAX_BACKOFF_EXPONENT: u32 = 10;

    /// Reset values below this are relative seconds, above it absolute Unix
    /// timestamps.
    pub const RESET_ABSOLUTE_THRESHOLD: u64 = 1_000_000;

    /// Trailing window for 429-rate accounting, in seconds.
    pub const RECENT_429_WINDOW_SECS: u64 = 60;

    /// Safety margin added to window-based wait estimates, in milliseconds.
    pub const WAIT_BUFFER_MS: u64 = 50;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quota_matches_provider_contract() {
        let config = QuotaConfig::default();
        assert_eq!(config.capacity, 3000);
        assert_eq!(config.window, Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_grows_and_saturates() {
        let backoff = BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        };
        assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
        // 2^10 > 300, so the cap takes over well before the exponent clamp.
        assert_eq!(backoff.delay_for(20), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_stays_within_fraction() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let delayed = jittered(base, 0.3);
            assert!(delayed >= base);
            assert!(delayed <= base + base.mul_f64(0.3));
        }
    }

    #[test]
    fn test_zero_delay_is_not_jittered() {
        assert_eq!(jittered(Duration::ZERO, 0.3), Duration::ZERO);
    }
}
