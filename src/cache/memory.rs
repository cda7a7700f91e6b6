use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheStore;
use crate::error::Result;

#[derive(Clone)]
struct CachedEntry {
    value: String,
    // `None` when the TTL overflows `Instant`.
    expires_at: Option<Instant>,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

const SWEEP_EVERY: usize = 256;

/// In-process TTL store. Expired entries are dropped lazily on read and swept
/// every few hundred writes, since superseded generations are never read again.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, CachedEntry>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let entry = CachedEntry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.insert(key.to_string(), entry);
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_stored_value() {
        let store = MemoryStore::new();
        store
            .set("perm:2:api", "[\"a\"]".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            store.get("perm:2:api").await.unwrap().as_deref(),
            Some("[\"a\"]")
        );
        assert!(store.get("perm:2:menu").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let store = MemoryStore::new();
        store
            .set("perm:2:api", "[]".to_string(), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("perm:2:api").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_drops_only_expired_entries() {
        let store = MemoryStore::new();
        store.set("perm:2:api@0.0", "[]".into(), Duration::from_millis(10)).await.unwrap();
        store.set("perm:gen:2:api", "1.1".into(), Duration::MAX).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.purge_expired();

        assert_eq!(store.len(), 1);
        assert!(store.get("perm:gen:2:api").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_prefix_only_touches_namespace() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("perm:2:api", "[]".into(), ttl).await.unwrap();
        store.set("perm:3:menu", "[]".into(), ttl).await.unwrap();
        store.set("scope:user:9", "{}".into(), ttl).await.unwrap();

        store.delete_prefix("perm:").await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get("scope:user:9").await.unwrap().is_some());
    }
}
