//! Read-through caching decorators for the repositories.
//!
//! Each decorator holds the wrapped repository and a [`TypedCache`]. Reads
//! build a key from the operation and its arguments, serve hits from the
//! cache and store misses with the tags the unit of work invalidates.
//! Writes go straight to the wrapped repository; invalidation after a save
//! is the unit of work's job. `remove_by_id` is the one write that
//! invalidates here, because it bypasses change tracking.

mod customer;
mod order;
mod product;

pub use customer::CachedCustomerRepository;
pub use order::CachedOrderRepository;
pub use product::CachedProductRepository;

use dispatch_cache::keys::generic;
use dispatch_cache::{CountWrapper, PagedResultWrapper, TtlPolicy, TypedCache};
use dispatch_core::Result;
use dispatch_core::cache::CachePriority;
use dispatch_core::entity::Entity;
use dispatch_core::paging::Page;
use dispatch_core::ports::{FilterOf, IdOf, PageRequestOf};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Kind of read, selecting the TTL and eviction priority.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ReadKind {
    Entity,
    List,
    Search,
    Analytics,
}

/// Cache settings and key/tag vocabulary for one entity kind.
#[derive(Clone)]
pub(crate) struct EntityCache<E: Entity> {
    cache: TypedCache,
    ttl: TtlPolicy,
    plural: &'static str,
    type_tag: &'static str,
    list_tag: &'static str,
    entity_tag: fn(IdOf<E>) -> String,
}

impl<E: Entity> EntityCache<E> {
    pub(crate) fn new(
        cache: TypedCache,
        ttl: TtlPolicy,
        plural: &'static str,
        type_tag: &'static str,
        list_tag: &'static str,
        entity_tag: fn(IdOf<E>) -> String,
    ) -> Self {
        let disabled = ttl.disabled_kinds();
        if !disabled.is_empty() {
            info!(entity = E::NAME, ?disabled, "Caching disabled for some reads");
        }
        Self {
            cache,
            ttl,
            plural,
            type_tag,
            list_tag,
            entity_tag,
        }
    }

    fn settings(&self, kind: ReadKind) -> (Duration, CachePriority) {
        match kind {
            ReadKind::Entity => (self.ttl.entity, CachePriority::High),
            ReadKind::List => (self.ttl.list, CachePriority::Normal),
            ReadKind::Search => (self.ttl.search, CachePriority::Low),
            ReadKind::Analytics => (self.ttl.analytics, CachePriority::Normal),
        }
    }

    /// Type tag, list tag and any extra tags.
    pub(crate) fn list_tags(&self, extra: &[String]) -> Vec<String> {
        let mut tags = vec![self.type_tag.to_string(), self.list_tag.to_string()];
        tags.extend_from_slice(extra);
        tags
    }

    /// Type tag and the entity tag for `id`.
    pub(crate) fn entity_tags(&self, id: IdOf<E>) -> Vec<String> {
        vec![self.type_tag.to_string(), (self.entity_tag)(id)]
    }

    pub(crate) async fn read<T, F, Fut>(
        &self,
        key: &str,
        tags: &[String],
        kind: ReadKind,
        load: F,
    ) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let (ttl, priority) = self.settings(kind);
        self.cache.read_through(key, tags, ttl, priority, load).await
    }

    pub(crate) async fn read_optional<T, F, Fut>(
        &self,
        key: &str,
        tags: &[String],
        kind: ReadKind,
        load: F,
    ) -> Result<Option<T>>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Option<T>>> + Send,
    {
        let (ttl, priority) = self.settings(kind);
        self.cache
            .read_through_optional(key, tags, ttl, priority, load)
            .await
    }

    pub(crate) async fn get_by_id<F, Fut>(
        &self,
        key: String,
        id: IdOf<E>,
        load: F,
    ) -> Result<Option<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Option<E>>> + Send,
    {
        self.read_optional(&key, &self.entity_tags(id), ReadKind::Entity, load)
            .await
    }

    pub(crate) async fn get_all<F, Fut>(&self, load: F) -> Result<Vec<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<E>>> + Send,
    {
        let key = generic::all(self.plural);
        self.read(&key, &self.list_tags(&[]), ReadKind::List, load).await
    }

    pub(crate) async fn find<F, Fut>(&self, filter: &FilterOf<E>, load: F) -> Result<Vec<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<E>>> + Send,
    {
        let key = generic::find(self.plural, filter);
        self.read(&key, &self.list_tags(&[]), ReadKind::List, load).await
    }

    pub(crate) async fn first<F, Fut>(&self, filter: &FilterOf<E>, load: F) -> Result<Option<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Option<E>>> + Send,
    {
        let key = generic::first(self.plural, filter);
        self.read_optional(&key, &self.list_tags(&[]), ReadKind::List, load)
            .await
    }

    pub(crate) async fn count<F, Fut>(&self, filter: Option<&FilterOf<E>>, load: F) -> Result<u64>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<u64>> + Send,
    {
        let key = generic::count(self.plural, filter);
        let wrapper: CountWrapper = self
            .read(&key, &self.list_tags(&[]), ReadKind::List, || async {
                load().await.map(CountWrapper::from)
            })
            .await?;
        Ok(wrapper.count)
    }

    pub(crate) async fn get_paged<F, Fut>(
        &self,
        request: &PageRequestOf<E>,
        load: F,
    ) -> Result<Page<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Page<E>>> + Send,
    {
        request.validate()?;
        let key = generic::paged(
            self.plural,
            request.page_number,
            request.page_size,
            request.filter.as_ref(),
            request.sort.as_ref(),
            request.ascending,
        );
        let wrapper: PagedResultWrapper<E> = self
            .read(&key, &self.list_tags(&[]), ReadKind::List, || async {
                load().await.map(PagedResultWrapper::from)
            })
            .await?;
        Ok(wrapper.into())
    }

    /// Drops everything cached for `id` and every collection of this kind.
    pub(crate) async fn invalidate_entity(&self, id: IdOf<E>) {
        let tags = self.entity_tags(id);
        debug!(entity = E::NAME, %id, "Invalidating after direct delete");
        self.cache.invalidate_tags(&tags).await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use dispatch_core::cache::{CacheStats, EntryOptions};
    use dispatch_core::ports::CacheService;
    use dispatch_cache::TagCache;
    use std::sync::{Arc, Mutex};

    /// Cache spy: forwards to a real [`TagCache`] and records every tag
    /// invalidation call.
    #[derive(Default)]
    pub struct RecordingCache {
        pub inner: TagCache,
        pub invalidations: Mutex<Vec<Vec<String>>>,
        pub writes: Mutex<Vec<String>>,
    }

    impl RecordingCache {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn invalidation_calls(&self) -> Vec<Vec<String>> {
            self.invalidations.lock().unwrap().clone()
        }

        pub fn written_keys(&self) -> Vec<String> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CacheService for RecordingCache {
        async fn get_bytes(&self, key: &str) -> Option<Arc<[u8]>> {
            self.inner.get_bytes(key).await
        }

        async fn set_bytes(&self, key: &str, value: Vec<u8>, tags: &[String], options: EntryOptions) {
            self.writes.lock().unwrap().push(key.to_string());
            self.inner.set_bytes(key, value, tags, options).await;
        }

        async fn tag_stamp(&self, tags: &[String]) -> u64 {
            self.inner.tag_stamp(tags)
        }

        async fn set_bytes_if_fresh(
            &self,
            key: &str,
            value: Vec<u8>,
            tags: &[String],
            options: EntryOptions,
            stamp: u64,
        ) -> bool {
            let stored = self.inner.set_if_fresh(key, value, tags, options, stamp);
            if stored {
                self.writes.lock().unwrap().push(key.to_string());
            }
            stored
        }

        async fn remove(&self, key: &str) {
            CacheService::remove(&self.inner, key).await;
        }

        async fn remove_by_pattern(&self, pattern: &str) -> usize {
            CacheService::remove_by_pattern(&self.inner, pattern).await
        }

        async fn invalidate_tags(&self, tags: &[String]) {
            self.invalidations.lock().unwrap().push(tags.to_vec());
            CacheService::invalidate_tags(&self.inner, tags).await;
        }

        async fn invalidate_all(&self) {
            CacheService::invalidate_all(&self.inner).await;
        }

        async fn stats(&self) -> CacheStats {
            CacheService::stats(&self.inner).await
        }
    }
}
