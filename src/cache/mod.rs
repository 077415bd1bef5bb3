//! Response cache with per-entry TTL.
//!
//! Identical generation requests within the TTL window are served from the
//! cache without touching the upstream backend. Cache storage failures are
//! never surfaced to callers: a failed read is a miss and a failed write is
//! dropped, so a broken cache degrades to pass-through behavior.

use crate::provider::GenerateResponse;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub mod key;
pub mod memory;

pub use key::request_key;
pub use memory::{InMemoryCacheStore, NoopCacheStore};

/// Default entry lifetime: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors from the underlying cache storage.
///
/// These never propagate past `ResponseCache`; they exist so stores can
/// report failures for logging.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Cache storage error: {0}")]
pub struct CacheError(pub String);

/// A cached response with its expiry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub response: GenerateResponse,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CachedResponse {
    pub fn new(response: GenerateResponse, ttl: Duration) -> Self {
        Self {
            response,
            created_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        }
    }

    /// Expiry is evaluated lazily at read time; no background sweeper.
    pub fn is_expired(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.num_seconds() >= self.ttl_secs as i64
    }
}

/// Pluggable cache storage.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError>;
    async fn put(&self, key: &str, entry: CachedResponse) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
}

/// TTL-aware cache front.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Cache front over an in-memory store with the default TTL.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCacheStore::default()), DEFAULT_TTL)
    }

    /// Cache front that stores nothing. Every lookup is a miss.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopCacheStore), DEFAULT_TTL)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a fresh entry. Expired entries count as misses and are
    /// evicted in the background; storage errors count as misses.
    pub async fn get(&self, key: &str) -> Option<GenerateResponse> {
        let entry = match self.store.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "cache read failed; treating as miss");
                metrics::counter!("turnstile_cache_errors").increment(1);
                return None;
            }
        };

        if entry.is_expired() {
            let store = Arc::clone(&self.store);
            let key = key.to_string();
            tokio::spawn(async move {
                if let Err(e) = store.remove(&key).await {
                    tracing::debug!(key = %key, error = %e, "expired entry eviction failed");
                }
            });
            metrics::counter!("turnstile_cache_misses").increment(1);
            return None;
        }

        metrics::counter!("turnstile_cache_hits").increment(1);
        Some(entry.response)
    }

    /// Store a response under the default TTL. Failures are logged and
    /// swallowed.
    pub async fn put(&self, key: &str, response: GenerateResponse) {
        self.put_with_ttl(key, response, self.default_ttl).await;
    }

    pub async fn put_with_ttl(&self, key: &str, response: GenerateResponse, ttl: Duration) {
        let entry = CachedResponse::new(response, ttl);
        if let Err(e) = self.store.put(key, entry).await {
            tracing::debug!(key = %key, error = %e, "cache write failed; dropping entry");
            metrics::counter!("turnstile_cache_errors").increment(1);
        }
    }

    /// Drop every entry. Failures are logged and swallowed.
    pub async fn clear(&self) {
        if let Err(e) = self.store.clear().await {
            tracing::debug!(error = %e, "cache clear failed");
        }
    }
}
