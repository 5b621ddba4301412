//! # feedgate
//!
//! An async front-end for metered sports-data APIs that share one hard quota
//! (typically 3000 requests per hour per resource category). feedgate sits
//! between an HTTP-facing service and the metered provider and makes sure the
//! quota is spent well and never overspent:
//!
//! - Per-entity admission control combining a token bucket (burst smoothing)
//!   with an exact sliding window (hard cap)
//! - Cooldown handling for provider throttling (HTTP 429), driven by
//!   `Retry-After`, the reported reset time, or jittered exponential backoff
//! - Quota synchronization from response headers and body metadata
//! - A sticky degrade mode that biases traffic towards the cache when the
//!   remaining budget is critically low
//! - Cache-aside reads with per-entity TTLs
//! - Single-flight coalescing so concurrent identical fetches cost one
//!   upstream request
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use feedgate::FeedClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FeedClient::builder()
//!         .base_url("https://api.example.com/v3")
//!         .api_token("secret-token")
//!         .build();
//!
//!     let payload = client.fetch("/livescores/inplay", &[("include", "scores")]).await?;
//!     println!("{payload}");
//!     Ok(())
//! }
//! ```
//!
//! The admission controller can also be used on its own for custom transport
//! stacks:
//!
//! ```rust,ignore
//! use feedgate::rate_limit::{QuotaConfig, RateLimitManager};
//! use feedgate::Entity;
//!
//! let manager = RateLimitManager::with_defaults();
//! match manager.acquire(Entity::Fixtures).await {
//!     Ok(()) => { /* perform the upstream call */ }
//!     Err(wait) => { /* sleep `wait` and retry */ }
//! }
//! ```

pub mod cache;
pub mod client;
pub mod entity;
pub mod error;
pub mod rate_limit;

// Re-export commonly used types at crate root
pub use cache::{Cache, InMemoryCache};
pub use client::{FeedClient, HttpTransport, Transport};
pub use entity::Entity;
pub use error::FeedError;
pub use rate_limit::RateLimitManager;

/// Result type alias using FeedError
pub type Result<T> = std::result::Result<T, FeedError>;
