use super::{EntityCache, ReadKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_cache::keys::{orders as keys, tags};
use dispatch_cache::{IntervalCountsWrapper, TtlPolicy, TypedCache};
use dispatch_core::Result;
use dispatch_core::ids::{CustomerId, OrderId};
use dispatch_core::order::{Order, OrderFilter, OrderStatus};
use dispatch_core::paging::Page;
use dispatch_core::ports::{OrderRepository, PageRequestOf, Repository};
use dispatch_core::reports::{CustomerIntervalCount, IntervalCount, OrderDetails};
use std::sync::Arc;

/// Caching decorator over an [`OrderRepository`].
pub struct CachedOrderRepository {
    inner: Arc<dyn OrderRepository>,
    cache: EntityCache<Order>,
}

impl CachedOrderRepository {
    pub fn new(inner: Arc<dyn OrderRepository>, cache: TypedCache, ttl: TtlPolicy) -> Self {
        Self {
            inner,
            cache: EntityCache::new(
                cache,
                ttl,
                keys::PLURAL,
                tags::ORDERS,
                tags::ORDER_LISTS,
                tags::order,
            ),
        }
    }

    /// List tags plus the customer and product tags, for joined results.
    fn detail_tags(&self, extra: &[String]) -> Vec<String> {
        let mut tags = self.cache.list_tags(extra);
        tags.extend([tags::CUSTOMERS.to_string(), tags::PRODUCTS.to_string()]);
        tags
    }

    fn report_tags(extra: &[String]) -> Vec<String> {
        let mut tags = vec![tags::ORDERS.to_string(), tags::REPORTS.to_string()];
        tags.extend_from_slice(extra);
        tags
    }

    async fn interval_counts<F, Fut>(
        &self,
        key: &str,
        tags: &[String],
        load: F,
    ) -> Result<Vec<IntervalCount>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<Vec<IntervalCount>>> + Send,
    {
        let wrapper: IntervalCountsWrapper = self
            .cache
            .read(key, tags, ReadKind::Analytics, || async {
                load().await.map(|counts| IntervalCountsWrapper { counts })
            })
            .await?;
        Ok(wrapper.counts)
    }
}

#[async_trait]
impl Repository for CachedOrderRepository {
    type Entity = Order;

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        self.cache
            .get_by_id(keys::by_id(id), id, || self.inner.get_by_id(id))
            .await
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        self.cache.get_all(|| self.inner.get_all()).await
    }

    async fn find(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        self.cache.find(filter, || self.inner.find(filter)).await
    }

    async fn first(&self, filter: &OrderFilter) -> Result<Option<Order>> {
        self.cache.first(filter, || self.inner.first(filter)).await
    }

    async fn exists(&self, filter: &OrderFilter) -> Result<bool> {
        self.inner.exists(filter).await
    }

    async fn count(&self, filter: Option<&OrderFilter>) -> Result<u64> {
        self.cache.count(filter, || self.inner.count(filter)).await
    }

    async fn get_paged(&self, request: &PageRequestOf<Order>) -> Result<Page<Order>> {
        self.cache
            .get_paged(request, || self.inner.get_paged(request))
            .await
    }

    async fn add(&self, entity: Order) -> Result<()> {
        self.inner.add(entity).await
    }

    async fn update(&self, entity: Order) -> Result<()> {
        self.inner.update(entity).await
    }

    async fn remove(&self, entity: &Order) -> Result<()> {
        self.inner.remove(entity).await
    }

    async fn remove_by_id(&self, id: OrderId) -> Result<bool> {
        let removed = self.inner.remove_by_id(id).await?;
        self.cache.invalidate_entity(id).await;
        Ok(removed)
    }

    async fn add_range(&self, entities: Vec<Order>) -> Result<()> {
        self.inner.add_range(entities).await
    }

    async fn update_range(&self, entities: Vec<Order>) -> Result<()> {
        self.inner.update_range(entities).await
    }

    async fn remove_range(&self, entities: &[Order]) -> Result<()> {
        self.inner.remove_range(entities).await
    }
}

#[async_trait]
impl OrderRepository for CachedOrderRepository {
    async fn by_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let tags = self.cache.list_tags(&[tags::customer_orders(customer_id)]);
        self.cache
            .read(&keys::by_customer(customer_id), &tags, ReadKind::List, || {
                self.inner.by_customer(customer_id)
            })
            .await
    }

    async fn by_customer_with_details(&self, customer_id: CustomerId) -> Result<Vec<OrderDetails>> {
        let tags = self.detail_tags(&[tags::customer_orders(customer_id)]);
        self.cache
            .read(
                &keys::by_customer_with_details(customer_id),
                &tags,
                ReadKind::List,
                || self.inner.by_customer_with_details(customer_id),
            )
            .await
    }

    async fn by_date_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>> {
        let tags = self.cache.list_tags(&[]);
        self.cache
            .read(&keys::by_date_range(from, to), &tags, ReadKind::List, || {
                self.inner.by_date_range(from, to)
            })
            .await
    }

    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let tags = self.cache.list_tags(&[]);
        self.cache
            .read(&keys::by_status(status), &tags, ReadKind::List, || {
                self.inner.by_status(status)
            })
            .await
    }

    async fn with_details(&self) -> Result<Vec<OrderDetails>> {
        let tags = self.detail_tags(&[]);
        self.cache
            .read(keys::WITH_DETAILS, &tags, ReadKind::List, || {
                self.inner.with_details()
            })
            .await
    }

    async fn with_full_details(&self, id: OrderId) -> Result<Option<OrderDetails>> {
        let mut tags = self.cache.entity_tags(id);
        tags.extend([tags::CUSTOMERS.to_string(), tags::PRODUCTS.to_string()]);
        self.cache
            .read_optional(&keys::full_details(id), &tags, ReadKind::Entity, || {
                self.inner.with_full_details(id)
            })
            .await
    }

    async fn count_by_distance_interval(&self) -> Result<Vec<IntervalCount>> {
        self.interval_counts(keys::COUNT_BY_DISTANCE, &Self::report_tags(&[]), || {
            self.inner.count_by_distance_interval()
        })
        .await
    }

    async fn count_by_distance_interval_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<IntervalCount>> {
        self.interval_counts(
            &keys::count_by_distance_for_customer(customer_id),
            &Self::report_tags(&[tags::customer_orders(customer_id)]),
            || self.inner.count_by_distance_interval_for_customer(customer_id),
        )
        .await
    }

    async fn count_by_customer_and_interval(&self) -> Result<Vec<CustomerIntervalCount>> {
        let tags = Self::report_tags(&[tags::CUSTOMERS.to_string()]);
        self.cache
            .read(
                keys::COUNT_BY_CUSTOMER_INTERVAL,
                &tags,
                ReadKind::Analytics,
                || self.inner.count_by_customer_and_interval(),
            )
            .await
    }

    async fn has_orders_in_progress_for_customer(&self, customer_id: CustomerId) -> Result<bool> {
        self.inner
            .has_orders_in_progress_for_customer(customer_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cached::test_support::RecordingCache;
    use crate::memory::MemoryDatabase;
    use dispatch_core::cost::Quantity;
    use dispatch_core::customer::Customer;
    use dispatch_core::entity::Entity;
    use dispatch_core::geo::Coordinate;
    use dispatch_core::ports::{CacheService, DataContext};
    use dispatch_core::product::Product;
    use std::time::Duration;

    struct Setup {
        ctx: crate::memory::MemoryDataContext,
        cache: Arc<RecordingCache>,
        orders: CachedOrderRepository,
        order: Order,
    }

    async fn setup(ttl: TtlPolicy) -> Setup {
        let ctx = MemoryDatabase::new().context();
        let customer = Customer::create("Ana", "ana@example.com", "1").unwrap();
        let product = Product::create("Cement", None, 1_000, "kg").unwrap();
        let order = Order::create(
            customer.id(),
            product.id(),
            Quantity::new(1).unwrap(),
            Coordinate::new(-12.046374, -77.042793).unwrap(),
            Coordinate::new(-12.066667, -77.116667).unwrap(),
        )
        .unwrap();
        ctx.customers().add(customer).await.unwrap();
        ctx.products().add(product).await.unwrap();
        ctx.orders().add(order.clone()).await.unwrap();
        ctx.save_changes().await.unwrap();

        let cache = RecordingCache::new();
        let service: Arc<dyn CacheService> = cache.clone();
        let orders = CachedOrderRepository::new(ctx.orders(), TypedCache::new(service), ttl);
        Setup {
            ctx,
            cache,
            orders,
            order,
        }
    }

    #[tokio::test]
    async fn test_get_by_id_is_served_from_cache() {
        let s = setup(TtlPolicy::default()).await;
        let first = s.orders.get_by_id(s.order.id()).await.unwrap().unwrap();

        // A direct delete through the raw repository is invisible to the cache.
        s.ctx.orders().remove_by_id(s.order.id()).await.unwrap();
        let second = s.orders.get_by_id(s.order.id()).await.unwrap().unwrap();
        assert_eq!(first.id(), second.id());

        let stats = s.cache.inner.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_by_id_entry_carries_entity_tag() {
        let s = setup(TtlPolicy::default()).await;
        s.orders.get_by_id(s.order.id()).await.unwrap();

        let index = s.cache.inner.index();
        let tags = index.tags_for_key(&keys::by_id(s.order.id()));
        assert!(tags.contains(&tags::ORDERS.to_string()));
        assert!(tags.contains(&tags::order(s.order.id())));
    }

    #[tokio::test]
    async fn test_remove_by_id_invalidates_entity_and_type_tags() {
        let s = setup(TtlPolicy::default()).await;
        s.orders.get_by_id(s.order.id()).await.unwrap();

        assert!(s.orders.remove_by_id(s.order.id()).await.unwrap());
        assert_eq!(
            s.cache.invalidation_calls(),
            vec![vec![tags::ORDERS.to_string(), tags::order(s.order.id())]]
        );
        assert!(s.orders.get_by_id(s.order.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writes_do_not_invalidate() {
        let s = setup(TtlPolicy::default()).await;
        let mut order = s.order.clone();
        order.update_status(OrderStatus::InProgress).unwrap();
        s.orders.update(order).await.unwrap();
        assert!(s.cache.invalidation_calls().is_empty());
        assert_eq!(s.ctx.pending_changes().len(), 1);
    }

    #[tokio::test]
    async fn test_uncached_consistency_checks() {
        let s = setup(TtlPolicy::default()).await;
        let customer = s.order.customer_id();
        assert!(s.orders.has_orders_in_progress_for_customer(customer).await.unwrap());
        assert!(s.orders.exists(&OrderFilter::for_customer(customer)).await.unwrap());
        assert!(s.cache.written_keys().is_empty());
    }

    #[tokio::test]
    async fn test_reports_are_wrapped_and_tagged() {
        let s = setup(TtlPolicy::default()).await;
        let counts = s.orders.count_by_distance_interval().await.unwrap();
        assert_eq!(counts[0].count, 1);

        let tags = s.cache.inner.index().tags_for_key(keys::COUNT_BY_DISTANCE);
        assert!(tags.contains(&tags::REPORTS.to_string()));

        s.cache.invalidate_tag(tags::REPORTS).await;
        assert!(s.cache.inner.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_reads_go_to_storage() {
        let s = setup(TtlPolicy::default().with_list(Duration::ZERO)).await;
        s.orders.get_all().await.unwrap();
        s.orders.by_customer(s.order.customer_id()).await.unwrap();
        s.orders.count(None).await.unwrap();
        s.orders
            .get_paged(&dispatch_core::paging::PageRequest::new(1, 10))
            .await
            .unwrap();
        assert!(s.cache.written_keys().is_empty());

        s.orders.get_by_id(s.order.id()).await.unwrap();
        assert_eq!(s.cache.written_keys(), vec![keys::by_id(s.order.id())]);
    }

    #[tokio::test]
    async fn test_customer_scoped_reads_carry_customer_tag() {
        let s = setup(TtlPolicy::default()).await;
        let customer = s.order.customer_id();
        s.orders.by_customer_with_details(customer).await.unwrap();

        s.cache.invalidate_tag(&tags::customer_orders(customer)).await;
        assert!(s.cache.inner.is_empty());
    }
}
