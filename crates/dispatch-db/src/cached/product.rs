use super::{EntityCache, ReadKind};
use async_trait::async_trait;
use dispatch_cache::keys::{products as keys, tags};
use dispatch_cache::{AveragePriceWrapper, PriceRangeWrapper, TtlPolicy, TypedCache};
use dispatch_core::Result;
use dispatch_core::ids::ProductId;
use dispatch_core::paging::Page;
use dispatch_core::ports::{PageRequestOf, ProductRepository, Repository};
use dispatch_core::product::{Product, ProductFilter};
use dispatch_core::reports::ProductSummary;
use std::sync::Arc;

/// Caching decorator over a [`ProductRepository`].
pub struct CachedProductRepository {
    inner: Arc<dyn ProductRepository>,
    cache: EntityCache<Product>,
}

impl CachedProductRepository {
    pub fn new(inner: Arc<dyn ProductRepository>, cache: TypedCache, ttl: TtlPolicy) -> Self {
        Self {
            inner,
            cache: EntityCache::new(
                cache,
                ttl,
                keys::PLURAL,
                tags::PRODUCTS,
                tags::PRODUCT_LISTS,
                tags::product,
            ),
        }
    }

    fn analytics_tags() -> Vec<String> {
        vec![tags::PRODUCTS.to_string(), tags::REPORTS.to_string()]
    }
}

#[async_trait]
impl Repository for CachedProductRepository {
    type Entity = Product;

    async fn get_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        self.cache
            .get_by_id(keys::by_id(id), id, || self.inner.get_by_id(id))
            .await
    }

    async fn get_all(&self) -> Result<Vec<Product>> {
        self.cache.get_all(|| self.inner.get_all()).await
    }

    async fn find(&self, filter: &ProductFilter) -> Result<Vec<Product>> {
        self.cache.find(filter, || self.inner.find(filter)).await
    }

    async fn first(&self, filter: &ProductFilter) -> Result<Option<Product>> {
        self.cache.first(filter, || self.inner.first(filter)).await
    }

    async fn exists(&self, filter: &ProductFilter) -> Result<bool> {
        self.inner.exists(filter).await
    }

    async fn count(&self, filter: Option<&ProductFilter>) -> Result<u64> {
        self.cache.count(filter, || self.inner.count(filter)).await
    }

    async fn get_paged(&self, request: &PageRequestOf<Product>) -> Result<Page<Product>> {
        self.cache
            .get_paged(request, || self.inner.get_paged(request))
            .await
    }

    async fn add(&self, entity: Product) -> Result<()> {
        self.inner.add(entity).await
    }

    async fn update(&self, entity: Product) -> Result<()> {
        self.inner.update(entity).await
    }

    async fn remove(&self, entity: &Product) -> Result<()> {
        self.inner.remove(entity).await
    }

    async fn remove_by_id(&self, id: ProductId) -> Result<bool> {
        let removed = self.inner.remove_by_id(id).await?;
        self.cache.invalidate_entity(id).await;
        Ok(removed)
    }

    async fn add_range(&self, entities: Vec<Product>) -> Result<()> {
        self.inner.add_range(entities).await
    }

    async fn update_range(&self, entities: Vec<Product>) -> Result<()> {
        self.inner.update_range(entities).await
    }

    async fn remove_range(&self, entities: &[Product]) -> Result<()> {
        self.inner.remove_range(entities).await
    }
}

#[async_trait]
impl ProductRepository for CachedProductRepository {
    async fn search_by_name(&self, term: &str) -> Result<Vec<Product>> {
        let tags = self.cache.list_tags(&[]);
        self.cache
            .read(&keys::search(term), &tags, ReadKind::Search, || {
                self.inner.search_by_name(term)
            })
            .await
    }

    async fn active_products(&self) -> Result<Vec<Product>> {
        let tags = self.cache.list_tags(&[]);
        self.cache
            .read(keys::ACTIVE, &tags, ReadKind::List, || {
                self.inner.active_products()
            })
            .await
    }

    async fn by_price_range(&self, min_cents: u64, max_cents: u64) -> Result<Vec<Product>> {
        let tags = self.cache.list_tags(&[]);
        self.cache
            .read(
                &keys::by_price(min_cents, max_cents),
                &tags,
                ReadKind::Search,
                || self.inner.by_price_range(min_cents, max_cents),
            )
            .await
    }

    async fn product_list(&self) -> Result<Vec<ProductSummary>> {
        let tags = self.cache.list_tags(&[]);
        self.cache
            .read(keys::LIST, &tags, ReadKind::List, || self.inner.product_list())
            .await
    }

    async fn average_price(&self) -> Result<Option<u64>> {
        let wrapper: AveragePriceWrapper = self
            .cache
            .read(
                keys::AVERAGE_PRICE,
                &Self::analytics_tags(),
                ReadKind::Analytics,
                || async {
                    let average_cents = self.inner.average_price().await?;
                    Ok(AveragePriceWrapper { average_cents })
                },
            )
            .await?;
        Ok(wrapper.average_cents)
    }

    async fn price_range(&self) -> Result<Option<(u64, u64)>> {
        let wrapper: PriceRangeWrapper = self
            .cache
            .read(
                keys::PRICE_RANGE,
                &Self::analytics_tags(),
                ReadKind::Analytics,
                || async { self.inner.price_range().await.map(PriceRangeWrapper::from) },
            )
            .await?;
        Ok(wrapper.into_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cached::test_support::RecordingCache;
    use crate::memory::{MemoryDataContext, MemoryDatabase};
    use dispatch_core::ports::{CacheService, DataContext};
    use std::time::Duration;

    async fn setup(
        ttl: TtlPolicy,
    ) -> (MemoryDataContext, Arc<RecordingCache>, CachedProductRepository) {
        let ctx = MemoryDatabase::new().context();
        ctx.products()
            .add_range(vec![
                Product::create("Sand", None, 300, "kg").unwrap(),
                Product::create("Cement", Some("Portland"), 1_250, "bag").unwrap(),
            ])
            .await
            .unwrap();
        ctx.save_changes().await.unwrap();

        let cache = RecordingCache::new();
        let service: Arc<dyn CacheService> = cache.clone();
        let repo = CachedProductRepository::new(ctx.products(), TypedCache::new(service), ttl);
        (ctx, cache, repo)
    }

    #[tokio::test]
    async fn test_aggregates_are_cached_under_report_tag() {
        let (_ctx, cache, repo) = setup(TtlPolicy::default()).await;
        assert_eq!(repo.average_price().await.unwrap(), Some(775));
        assert_eq!(repo.price_range().await.unwrap(), Some((300, 1_250)));
        assert_eq!(repo.average_price().await.unwrap(), Some(775));
        assert_eq!(cache.inner.stats().hits, 1);

        cache.invalidate_tag(tags::REPORTS).await;
        assert!(cache.inner.is_empty());
    }

    #[tokio::test]
    async fn test_empty_catalog_aggregates_are_cached_as_none() {
        let ctx = MemoryDatabase::new().context();
        let cache = RecordingCache::new();
        let service: Arc<dyn CacheService> = cache.clone();
        let repo = CachedProductRepository::new(
            ctx.products(),
            TypedCache::new(service),
            TtlPolicy::default(),
        );

        assert_eq!(repo.average_price().await.unwrap(), None);
        assert_eq!(repo.price_range().await.unwrap(), None);
        assert_eq!(
            cache.written_keys(),
            vec![keys::AVERAGE_PRICE.to_string(), keys::PRICE_RANGE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_price_range_query_is_keyed_by_bounds() {
        let (_ctx, cache, repo) = setup(TtlPolicy::default()).await;
        let cheap = repo.by_price_range(0, 500).await.unwrap();
        let all = repo.by_price_range(0, 5_000).await.unwrap();
        assert_eq!(cheap.len(), 1);
        assert_eq!(all.len(), 2);
        assert_eq!(cache.written_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_list_until_invalidated() {
        let (ctx, cache, repo) = setup(TtlPolicy::default()).await;
        assert_eq!(repo.active_products().await.unwrap().len(), 2);

        let mut sand = repo.search_by_name("sand").await.unwrap().remove(0);
        sand.deactivate();
        repo.update(sand).await.unwrap();
        ctx.save_changes().await.unwrap();

        // Writes alone never touch the cache.
        assert_eq!(repo.active_products().await.unwrap().len(), 2);
        cache.invalidate_tag(tags::PRODUCT_LISTS).await;
        assert_eq!(repo.active_products().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_analytics_ttl_always_loads() {
        let ttl = TtlPolicy::default().with_analytics(Duration::ZERO);
        let (_ctx, cache, repo) = setup(ttl).await;
        repo.average_price().await.unwrap();
        repo.price_range().await.unwrap();
        assert!(cache.written_keys().is_empty());
    }
}
