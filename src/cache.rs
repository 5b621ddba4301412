//! Cache-aside storage for decoded upstream payloads.
//!
//! The cache is an external collaborator: the orchestrator checks it before
//! asking for admission and writes fetched payloads back with the entity's
//! TTL. It is allowed to be absent or broken — every cache failure degrades
//! to a miss, never to a failed request.
//!
//! [`InMemoryCache`] is the bundled implementation. Deployments with a shared
//! cache backend implement [`Cache`] over their own client.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use feedgate::cache::{Cache, InMemoryCache};
//!
//! # tokio_test::block_on(async {
//! let cache = InMemoryCache::new();
//! cache.set("feedgate:teams:/teams/1:", &serde_json::json!({"id": 1}), Duration::from_secs(60))
//!     .await
//!     .unwrap();
//! assert!(cache.get("feedgate:teams:/teams/1:").await.unwrap().is_some());
//! # });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Error from a cache backend.
///
/// Carries only a description; the orchestrator logs it and treats the
/// operation as a miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheError(pub String);

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cache error: {}", self.0)
    }
}

impl std::error::Error for CacheError {}

/// A TTL-keyed key/value store for decoded payloads.
pub trait Cache: Send + Sync {
    /// Look up a non-expired value.
    fn get(&self, key: &str)
    -> impl Future<Output = Result<Option<Value>, CacheError>> + Send;

    /// Store a value with a per-entry TTL.
    fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Remove a value.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// In-process cache with per-entry expiry.
///
/// Entries expire lazily: an expired entry is dropped by the `get` that
/// observes it, and [`InMemoryCache::purge`] sweeps the rest.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl InMemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry.
    pub async fn purge(&self) {
        let now = Instant::now();
        self.entries.lock().await.retain(|_, (_, deadline)| *deadline > now);
    }

    /// Number of stored entries, including not-yet-purged expired ones.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache holds no entries at all.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let deadline = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.clone(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
