//! In-memory cache stores.

use super::{CacheError, CacheStore, CachedResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Default entry cap for the in-memory store.
pub const DEFAULT_CAPACITY: usize = 50;

/// Bounded in-memory cache store.
///
/// When the cap is reached, the oldest entry by creation time is evicted to
/// make room. Suitable as a hot layer in front of durable storage or as the
/// only layer in single-process deployments.
pub struct InMemoryCacheStore {
    entries: DashMap<String, CachedResponse>,
    capacity: usize,
}

impl InMemoryCacheStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest: Option<(String, DateTime<Utc>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().created_at))
            .min_by_key(|(_, created)| *created);
        if let Some((key, _)) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn put(&self, key: &str, entry: CachedResponse) -> Result<(), CacheError> {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}

/// Store that discards everything. Used when caching is disabled or no
/// storage backend is available.
pub struct NoopCacheStore;

#[async_trait]
impl CacheStore for NoopCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<CachedResponse>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _entry: CachedResponse) -> Result<(), CacheError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::GenerateResponse;
    use std::time::Duration;

    fn entry() -> CachedResponse {
        CachedResponse::new(
            GenerateResponse {
                candidates: vec![],
                usage: None,
            },
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn put_get_remove() {
        let store = InMemoryCacheStore::default();
        store.put("a", entry()).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());
        store.remove("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cap_evicts_oldest_entry() {
        let store = InMemoryCacheStore::new(3);
        for i in 0..3 {
            let mut e = entry();
            e.created_at = Utc::now() - chrono::Duration::seconds(10 - i);
            store.put(&format!("k{i}"), e).await.unwrap();
        }
        store.put("k3", entry()).await.unwrap();

        assert_eq!(store.len(), 3);
        // k0 was oldest by creation time.
        assert!(store.get("k0").await.unwrap().is_none());
        assert!(store.get("k3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn overwriting_existing_key_does_not_evict() {
        let store = InMemoryCacheStore::new(2);
        store.put("a", entry()).await.unwrap();
        store.put("b", entry()).await.unwrap();
        store.put("a", entry()).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get("b").await.unwrap().is_some());
    }
}
