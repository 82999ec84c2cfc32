//! Typed JSON access over a byte-level [`CacheService`].

use dispatch_core::Result;
use dispatch_core::cache::{CachePriority, EntryOptions};
use dispatch_core::ports::CacheService;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Serializing front end for a shared cache.
///
/// Encoding problems never reach the caller: an undecodable entry is dropped
/// and reported as a miss, an unencodable value is simply not stored.
///
/// While the bypass switch is on, read-through calls go straight to the
/// loader and store nothing.
#[derive(Clone)]
pub struct TypedCache {
    inner: Arc<dyn CacheService>,
    bypass: Arc<AtomicBool>,
}

impl TypedCache {
    pub fn new(inner: Arc<dyn CacheService>) -> Self {
        Self {
            inner,
            bypass: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares `switch` as the bypass switch.
    pub fn with_bypass(mut self, switch: Arc<AtomicBool>) -> Self {
        self.bypass = switch;
        self
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass.load(Ordering::SeqCst)
    }

    pub fn service(&self) -> &Arc<dyn CacheService> {
        &self.inner
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.inner.get_bytes(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                self.inner.remove(key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
        tags: &[String],
        options: EntryOptions,
    ) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.inner.set_bytes(key, bytes, tags, options).await,
            Err(e) => warn!(key, error = %e, "Skipping cache write for unencodable value"),
        }
    }

    /// Stores `value` unless one of `tags` was invalidated since `stamp`.
    pub async fn set_if_fresh<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
        tags: &[String],
        options: EntryOptions,
        stamp: u64,
    ) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.inner
                    .set_bytes_if_fresh(key, bytes, tags, options, stamp)
                    .await
            }
            Err(e) => {
                warn!(key, error = %e, "Skipping cache write for unencodable value");
                false
            }
        }
    }

    pub async fn remove(&self, key: &str) {
        self.inner.remove(key).await;
    }

    pub async fn invalidate_tags(&self, tags: &[String]) {
        self.inner.invalidate_tags(tags).await;
    }

    /// Returns the cached value for `key`, or loads, stores and returns it.
    ///
    /// A zero `ttl` bypasses the cache entirely. Load errors are returned
    /// and nothing is stored. A value whose tags are invalidated while it is
    /// loading is returned but not stored.
    pub async fn read_through<T, F, Fut>(
        &self,
        key: &str,
        tags: &[String],
        ttl: Duration,
        priority: CachePriority,
        load: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        if ttl.is_zero() || self.is_bypassed() {
            return load().await;
        }
        if let Some(hit) = self.get::<T>(key).await {
            debug!(key, "Read served from cache");
            return Ok(hit);
        }

        let stamp = self.inner.tag_stamp(tags).await;
        let value = load().await?;
        let options = EntryOptions::absolute(ttl).with_priority(priority);
        self.set_if_fresh(key, &value, tags, options, stamp).await;
        Ok(value)
    }

    /// Like [`read_through`](Self::read_through) but absent results are
    /// not cached.
    pub async fn read_through_optional<T, F, Fut>(
        &self,
        key: &str,
        tags: &[String],
        ttl: Duration,
        priority: CachePriority,
        load: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Option<T>>> + Send,
    {
        if ttl.is_zero() || self.is_bypassed() {
            return load().await;
        }
        if let Some(hit) = self.get::<T>(key).await {
            debug!(key, "Read served from cache");
            return Ok(Some(hit));
        }

        let stamp = self.inner.tag_stamp(tags).await;
        let value = load().await?;
        if let Some(found) = &value {
            let options = EntryOptions::absolute(ttl).with_priority(priority);
            self.set_if_fresh(key, found, tags, options, stamp).await;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TagCache;
    use dispatch_core::Error;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use tokio::sync::oneshot;

    fn typed() -> (Arc<TagCache>, TypedCache) {
        let store = Arc::new(TagCache::default());
        let typed = TypedCache::new(store.clone());
        (store, typed)
    }

    #[tokio::test]
    async fn test_read_through_loads_once() {
        let (_, cache) = typed();
        let loads = AtomicUsize::new(0);
        let tags = vec!["T".to_string()];

        for _ in 0..3 {
            let value: Vec<u32> = cache
                .read_through("k", &tags, Duration::from_secs(60), CachePriority::Normal, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_bypasses_cache() {
        let (store, cache) = typed();
        let loads = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .read_through("k", &[], Duration::ZERO, CachePriority::Normal, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(7u64)
                })
                .await
                .unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidation_during_load_discards_result() {
        let (store, cache) = typed();
        let tags = vec!["orders".to_string()];
        let storage = Arc::new(AtomicU64::new(1));
        let (loaded_tx, loaded_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel::<()>();

        let reader = {
            let cache = cache.clone();
            let tags = tags.clone();
            let storage = storage.clone();
            tokio::spawn(async move {
                cache
                    .read_through("orders:all", &tags, Duration::from_secs(60), CachePriority::Normal, || async move {
                        let value = storage.load(Ordering::SeqCst);
                        let _ = loaded_tx.send(());
                        let _ = resume_rx.await;
                        Ok(value)
                    })
                    .await
            })
        };

        loaded_rx.await.unwrap();
        storage.store(2, Ordering::SeqCst);
        store.invalidate_tags(&tags);
        resume_tx.send(()).unwrap();

        // The caller still gets what it read; the cache does not keep it.
        assert_eq!(reader.await.unwrap().unwrap(), 1);
        assert!(store.get("orders:all").is_none());

        let fresh: u64 = cache
            .read_through("orders:all", &tags, Duration::from_secs(60), CachePriority::Normal, || async {
                Ok(storage.load(Ordering::SeqCst))
            })
            .await
            .unwrap();
        assert_eq!(fresh, 2);
        assert!(store.get("orders:all").is_some());
    }

    #[tokio::test]
    async fn test_bypass_switch_skips_cache() {
        let (store, cache) = typed();
        let switch = Arc::new(AtomicBool::new(true));
        let cache = cache.with_bypass(switch.clone());
        store.set("k", b"1".to_vec(), &[], EntryOptions::default());

        let value: u64 = cache
            .read_through("k", &[], Duration::from_secs(60), CachePriority::Normal, || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
        let absent: Option<u64> = cache
            .read_through_optional("other", &[], Duration::from_secs(60), CachePriority::Normal, || async {
                Ok(Some(3))
            })
            .await
            .unwrap();
        assert_eq!(absent, Some(3));
        assert_eq!(store.len(), 1);

        switch.store(false, Ordering::SeqCst);
        let cached: u64 = cache
            .read_through("k", &[], Duration::from_secs(60), CachePriority::Normal, || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(cached, 1);
    }

    #[tokio::test]
    async fn test_load_error_is_not_cached() {
        let (store, cache) = typed();
        let result: Result<u64> = cache
            .read_through("k", &[], Duration::from_secs(60), CachePriority::Normal, || async {
                Err(Error::Database("unavailable".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_absent_values_are_not_cached() {
        let (store, cache) = typed();
        let found: Option<String> = cache
            .read_through_optional("k", &[], Duration::from_secs(60), CachePriority::Normal, || async {
                Ok(None)
            })
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let (store, cache) = typed();
        store.set("k", b"not json".to_vec(), &[], EntryOptions::default());

        let value: Option<u64> = cache.get("k").await;
        assert!(value.is_none());
        assert!(store.is_empty());
    }
}
